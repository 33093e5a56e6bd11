//! Turns an already-parsed `DR` response into a dispatched frame
//! (`spec.md` §4.6), grounded on the original's `ReceiveDataTask` and on
//! [`crate::media::serial::SerialMedium`]'s allocate-or-discard fallback.
//!
//! Unlike the serial driver, the modem response is parsed eagerly by
//! [`crate::media::uhf::response::ResponseReader`] before this task exists,
//! so there is no byte stream left to discard from on exhaustion (S6): the
//! payload is simply dropped after being logged.

use crate::frame::FramePool;
use crate::io::Writable;
use crate::link::address::Address;
use crate::link::broker::Broker;
use crate::link::frame::Protocol;
use crate::lock::Lock;
use crate::media::uhf::response::DataReceived;
use crate::poll::Poll;

pub struct ReceiveTask {
    data: DataReceived,
}

impl ReceiveTask {
    pub fn new(data: DataReceived) -> Self {
        Self { data }
    }

    pub fn execute(&mut self, pool: &mut FramePool, broker: &Lock<Broker>) -> Poll<()> {
        match pool.allocate(self.data.payload.len()) {
            Poll::Ready((mut writer, reader)) => {
                writer.write(&self.data.payload).unwrap();
                let mut guard = match broker.poll_lock() {
                    Poll::Ready(g) => g,
                    Poll::Pending => return Poll::Pending,
                };
                let _ = guard.poll_dispatch_received_frame(
                    Protocol(self.data.protocol),
                    Address::uhf(self.data.source),
                    reader,
                );
                Poll::Ready(())
            }
            Poll::Pending => {
                crate::mesh_info!("uhf: no buffer available, discarding received frame");
                Poll::Ready(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SHORT_LEN;
    use crate::frame::FramePoolStorage;
    use crate::link::frame::Protocol as LinkProtocol;
    use heapless::Vec as HVec;

    fn data(payload: &[u8]) -> DataReceived {
        let mut v: HVec<u8, { crate::config::MTU }> = HVec::new();
        v.extend_from_slice(payload).unwrap();
        DataReceived {
            protocol: 0x10,
            source: 0xC4,
            payload: v,
        }
    }

    #[test]
    fn s6_discards_on_pool_exhaustion() {
        static STORAGE: FramePoolStorage = FramePoolStorage::new();
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        let mut pool = STORAGE.take().unwrap();
        let mut handles = Vec::new();
        while let Poll::Ready(h) = pool.allocate(SHORT_LEN) {
            handles.push(h);
        }
        let mut task = ReceiveTask::new(data(&[0xDE, 0xAD]));
        assert_eq!(task.execute(&mut pool, &BROKER), Poll::Ready(()));
    }

    #[test]
    fn dispatches_to_registered_socket() {
        static STORAGE: FramePoolStorage = FramePoolStorage::new();
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        let mut pool = STORAGE.take().unwrap();
        let handle = {
            let mut guard = BROKER.poll_lock().unwrap();
            guard.register(LinkProtocol(0x10)).unwrap()
        };
        let mut task = ReceiveTask::new(data(&[0xDE, 0xAD]));
        assert_eq!(task.execute(&mut pool, &BROKER), Poll::Ready(()));
        let mut guard = BROKER.poll_lock().unwrap();
        let frame = guard.poll_dequeue_rx(handle).ready().expect("dispatched");
        assert_eq!(frame.remote.as_uhf_id(), Some(0xC4));
        assert_eq!(frame.reader.frame_length(), 2);
    }
}
