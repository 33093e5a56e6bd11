//! Serial media driver (`spec.md` §4.5, C6).
//!
//! Wire layout: 7 × `0xAA` preamble, 1 × `0xAB` terminator, then the header
//! `{protocol_number, source, destination, length}`, then `length` payload
//! bytes. Grounded in the teacher's `FrameSerial`-over-a-byte-stream shape
//! (`comms/src/lib.rs`), generalized from whole-frame `async fn` to the
//! byte-at-a-time receiver state machine the spec calls for.

use heapless::Vec as HVec;

use crate::frame::{FramePool, FrameReader, FrameWriter};
use crate::io::{Readable, ReadableWritable, Writable};
use crate::link::address::{Address, AddressKind};
use crate::link::broker::Broker;
use crate::link::frame::Protocol;
use crate::lock::Lock;
use crate::poll::Poll;

const PREAMBLE_LEN: usize = 7;
const PREAMBLE_BYTE: u8 = 0xAA;
const PREAMBLE_TERM: u8 = 0xAB;
const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy)]
struct Header {
    protocol: u8,
    source: u8,
    destination: u8,
    length: u8,
}

enum ReceiverState {
    /// Sliding window over the last bytes seen, looking for
    /// `AA AA AA AA AA AA AA AB`.
    SkipPreamble { window: [u8; PREAMBLE_LEN + 1], filled: usize },
    ParseHeader { bytes: HVec<u8, HEADER_LEN> },
    ReceiveData { header: Header, writer: FrameWriter, remaining: usize },
    DiscardData { remaining: usize },
}

impl ReceiverState {
    fn skip_preamble() -> Self {
        Self::SkipPreamble {
            window: [0; PREAMBLE_LEN + 1],
            filled: 0,
        }
    }
}

/// Turns a preamble-framed byte stream into link frames and back.
pub struct SerialMedium<'a, S> {
    stream: S,
    broker: &'a Lock<Broker>,
    local_address: Option<u8>,
    remote_address: Option<u8>,
    rx: ReceiverState,
    tx: SenderState,
}

enum SenderState {
    Idle,
    SendingHeader { header: [u8; PREAMBLE_LEN + 1 + HEADER_LEN], sent: usize, payload: FrameReader },
    SendingPayload { payload: FrameReader },
}

impl<'a, S: ReadableWritable> SerialMedium<'a, S> {
    pub fn new(stream: S, broker: &'a Lock<Broker>) -> Self {
        {
            let mut guard = broker.poll_lock().unwrap();
            guard.attach_medium(AddressKind::Serial);
        }
        Self {
            stream,
            broker,
            local_address: None,
            remote_address: None,
            rx: ReceiverState::skip_preamble(),
            tx: SenderState::Idle,
        }
    }

    /// Explicitly fixes the local serial address, bypassing address
    /// learning (`spec.md` §4.5).
    pub fn set_local_address(&mut self, address: u8) {
        self.local_address = Some(address);
    }

    pub fn execute(&mut self, pool: &mut FramePool) {
        self.poll_receive(pool);
        self.poll_send();
    }

    fn poll_receive(&mut self, pool: &mut FramePool) {
        loop {
            match &mut self.rx {
                ReceiverState::SkipPreamble { window, filled } => {
                    if self.stream.poll_readable(1).is_pending() {
                        return;
                    }
                    let b = self.stream.read_unchecked();
                    if *filled < window.len() {
                        window[*filled] = b;
                        *filled += 1;
                    } else {
                        window.copy_within(1.., 0);
                        *(window.last_mut().unwrap()) = b;
                    }
                    let matched = *filled == window.len()
                        && window[..PREAMBLE_LEN].iter().all(|&x| x == PREAMBLE_BYTE)
                        && window[PREAMBLE_LEN] == PREAMBLE_TERM;
                    if matched {
                        self.rx = ReceiverState::ParseHeader {
                            bytes: HVec::new(),
                        };
                    }
                }
                ReceiverState::ParseHeader { bytes } => {
                    while bytes.len() < HEADER_LEN {
                        if self.stream.poll_readable(1).is_pending() {
                            return;
                        }
                        bytes.push(self.stream.read_unchecked()).ok();
                    }
                    let header = Header {
                        protocol: bytes[0],
                        source: bytes[1],
                        destination: bytes[2],
                        length: bytes[3],
                    };
                    self.rx = self.admit_or_discard(header, pool);
                }
                ReceiverState::ReceiveData {
                    header,
                    writer,
                    remaining,
                } => {
                    while *remaining > 0 {
                        if self.stream.poll_readable(1).is_pending() {
                            return;
                        }
                        let b = self.stream.read_unchecked();
                        writer.write_unchecked(b);
                        *remaining -= 1;
                    }
                    let reader = writer.reader();
                    let header = *header;
                    self.dispatch(header, reader);
                    self.rx = ReceiverState::skip_preamble();
                }
                ReceiverState::DiscardData { remaining } => {
                    while *remaining > 0 {
                        if self.stream.poll_readable(1).is_pending() {
                            return;
                        }
                        self.stream.read_unchecked();
                        *remaining -= 1;
                    }
                    self.rx = ReceiverState::skip_preamble();
                }
            }
        }
    }

    fn admit_or_discard(&mut self, header: Header, pool: &mut FramePool) -> ReceiverState {
        if self.local_address.is_none() {
            self.local_address = Some(header.destination);
        }
        if self.remote_address.is_none() {
            self.remote_address = Some(header.source);
        }
        let dest_ok = self.local_address == Some(header.destination);
        let source_ok = self.remote_address == Some(header.source);
        if !dest_ok || !source_ok {
            crate::mesh_debug!("serial: address mismatch, discarding frame");
            return ReceiverState::DiscardData {
                remaining: header.length as usize,
            };
        }
        match pool.allocate(header.length as usize) {
            Poll::Ready((writer, _reader)) => ReceiverState::ReceiveData {
                header,
                writer,
                remaining: header.length as usize,
            },
            Poll::Pending => {
                crate::mesh_info!("serial: no buffer available, discarding frame");
                ReceiverState::DiscardData {
                    remaining: header.length as usize,
                }
            }
        }
    }

    fn dispatch(&mut self, header: Header, reader: FrameReader) {
        let mut guard = match self.broker.poll_lock() {
            Poll::Ready(g) => g,
            Poll::Pending => return,
        };
        let _ = guard.poll_dispatch_received_frame(
            Protocol(header.protocol),
            Address::serial(header.source),
            reader,
        );
    }

    fn poll_send(&mut self) {
        loop {
            match &mut self.tx {
                SenderState::Idle => {
                    let mut guard = match self.broker.poll_lock() {
                        Poll::Ready(g) => g,
                        Poll::Pending => return,
                    };
                    let item = match guard.poll_next_tx() {
                        Poll::Ready(item) => item,
                        Poll::Pending => return,
                    };
                    drop(guard);
                    let Some(dest) = item.address.as_serial_id() else {
                        continue;
                    };
                    let mut header = [0u8; PREAMBLE_LEN + 1 + HEADER_LEN];
                    header[..PREAMBLE_LEN].fill(PREAMBLE_BYTE);
                    header[PREAMBLE_LEN] = PREAMBLE_TERM;
                    header[PREAMBLE_LEN + 1] = item.protocol.0;
                    header[PREAMBLE_LEN + 2] = self.local_address.unwrap_or(0);
                    header[PREAMBLE_LEN + 3] = dest;
                    header[PREAMBLE_LEN + 4] = item.reader.frame_length() as u8;
                    self.tx = SenderState::SendingHeader {
                        header,
                        sent: 0,
                        payload: item.reader,
                    };
                }
                SenderState::SendingHeader {
                    header,
                    sent,
                    payload: _,
                } => {
                    while *sent < header.len() {
                        if self.stream.poll_writable(1).is_pending() {
                            return;
                        }
                        self.stream.write_unchecked(header[*sent]);
                        *sent += 1;
                    }
                    let SenderState::SendingHeader { payload, .. } =
                        core::mem::replace(&mut self.tx, SenderState::Idle)
                    else {
                        unreachable!()
                    };
                    self.tx = SenderState::SendingPayload { payload };
                }
                SenderState::SendingPayload { payload } => {
                    while !payload.is_all_read() {
                        if self.stream.poll_readable(1).is_pending()
                            || self.stream.poll_writable(1).is_pending()
                        {
                            return;
                        }
                        let b = payload.read_unchecked();
                        self.stream.write_unchecked(b);
                    }
                    self.tx = SenderState::Idle;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FramePoolStorage;
    use crate::io::mock::MockStream;

    #[test]
    fn s2_serial_frame_reception() {
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        static STORAGE: FramePoolStorage = FramePoolStorage::new();
        let mut pool = STORAGE.take().unwrap();
        let handle = {
            let mut guard = BROKER.poll_lock().unwrap();
            guard.register(Protocol(0x10)).unwrap()
        };
        let stream = MockStream::new();
        let mut medium = SerialMedium::new(stream, &BROKER);
        medium
            .stream
            .feed(&[0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAB, 0x10, 0x05, 0x0A, 0x02, 0xB1, 0xB2]);

        medium.execute(&mut pool);

        assert_eq!(medium.local_address, Some(0x0A));
        assert_eq!(medium.remote_address, Some(0x05));

        let mut guard = BROKER.poll_lock().unwrap();
        let frame = guard
            .poll_dequeue_rx(handle)
            .ready()
            .expect("expected a dispatched frame");
        assert_eq!(frame.protocol, Protocol(0x10));
        assert_eq!(frame.remote.as_serial_id(), Some(0x05));
        assert_eq!(frame.reader.frame_length(), 2);
    }

    #[test]
    fn garbage_prefix_without_preamble_yields_no_frame() {
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        static STORAGE: FramePoolStorage = FramePoolStorage::new();
        let mut pool = STORAGE.take().unwrap();
        let stream = MockStream::new();
        let mut medium = SerialMedium::new(stream, &BROKER);
        medium.stream.feed(&[0x01, 0x02, 0x03, 0xAA, 0xAA]);
        medium.execute(&mut pool);
        assert!(matches!(medium.rx, ReceiverState::SkipPreamble { .. }));
    }
}
