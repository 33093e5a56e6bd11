//! Application-facing socket over the [`Broker`] (`spec.md` §4.4).

use crate::error::SendError;
use crate::frame::FrameReader;
use crate::link::address::{Address, AddressKind};
use crate::link::broker::{Broker, SocketHandle};
use crate::link::frame::{LinkFrame, Protocol};
use crate::lock::Lock;
use crate::poll::Poll;
use crate::ready;

/// Supplies the neighbor addresses a broadcast send fans out across.
/// Implemented by the neighbor table so this module never depends on it.
pub trait NeighborAddressSource {
    /// Number of known neighbors.
    fn len(&self) -> usize;

    /// Address kinds that support a medium-wide broadcast address.
    fn broadcast_capable_kinds(&self) -> &[AddressKind];

    /// All addresses known for the neighbor at `index`, or `None` once
    /// `index >= len()`.
    fn addresses(&self, index: usize) -> Option<&[Address]>;
}

#[derive(Debug, Clone, Copy)]
enum BroadcastStage {
    Broadcasting(usize),
    Unicasting(usize),
    Done,
}

/// Resumable progress through a `poll_send_broadcast_frame` call.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastCursor {
    stage: BroadcastStage,
}

impl BroadcastCursor {
    pub const fn new() -> Self {
        Self {
            stage: BroadcastStage::Broadcasting(0),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for BroadcastCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// A protocol-scoped endpoint registered with a [`Broker`].
pub struct Socket<'a> {
    broker: &'a Lock<Broker>,
    handle: SocketHandle,
    protocol: Protocol,
}

impl<'a> Socket<'a> {
    /// Registers a new socket. Intended to be called during setup, before
    /// the cooperative scheduler starts contending for the broker lock.
    pub fn new(broker: &'a Lock<Broker>, protocol: Protocol) -> Option<Self> {
        let mut guard = broker.poll_lock().ready()?;
        let handle = guard.register(protocol)?;
        drop(guard);
        Some(Self {
            broker,
            handle,
            protocol,
        })
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn poll_receive_frame(&mut self) -> Poll<LinkFrame> {
        let mut guard = ready!(self.broker.poll_lock());
        guard.poll_dequeue_rx(self.handle)
    }

    pub fn poll_send_frame(
        &mut self,
        address: Address,
        reader: FrameReader,
    ) -> Result<Poll<()>, SendError> {
        let mut guard = match self.broker.poll_lock() {
            Poll::Ready(g) => g,
            Poll::Pending => return Ok(Poll::Pending),
        };
        guard.poll_enqueue_tx(address, self.protocol, reader)
    }

    /// Sends once per broadcast-capable address type, then unicasts to
    /// every neighbor that only has non-broadcast-capable addresses.
    /// Resumable via `cursor` across `Pending` returns.
    pub fn poll_send_broadcast_frame(
        &mut self,
        reader: &FrameReader,
        cursor: &mut BroadcastCursor,
        neighbors: &impl NeighborAddressSource,
    ) -> Poll<()> {
        loop {
            match cursor.stage {
                BroadcastStage::Broadcasting(i) => {
                    let kinds = neighbors.broadcast_capable_kinds();
                    if i >= kinds.len() {
                        cursor.stage = BroadcastStage::Unicasting(0);
                        continue;
                    }
                    let Some(addr) = Address::broadcast(kinds[i]) else {
                        cursor.stage = BroadcastStage::Broadcasting(i + 1);
                        continue;
                    };
                    match self.poll_send_frame(addr, reader.subreader()) {
                        Ok(Poll::Ready(())) | Err(_) => {
                            cursor.stage = BroadcastStage::Broadcasting(i + 1);
                        }
                        Ok(Poll::Pending) => return Poll::Pending,
                    }
                }
                BroadcastStage::Unicasting(i) => {
                    if i >= neighbors.len() {
                        cursor.stage = BroadcastStage::Done;
                        continue;
                    }
                    let kinds = neighbors.broadcast_capable_kinds();
                    let only_non_broadcast = neighbors
                        .addresses(i)
                        .map(|addrs| addrs.iter().all(|a| !kinds.contains(&a.kind())))
                        .unwrap_or(true);
                    if !only_non_broadcast {
                        cursor.stage = BroadcastStage::Unicasting(i + 1);
                        continue;
                    }
                    let Some(addr) = neighbors.addresses(i).and_then(|a| a.first()).cloned()
                    else {
                        cursor.stage = BroadcastStage::Unicasting(i + 1);
                        continue;
                    };
                    match self.poll_send_frame(addr, reader.subreader()) {
                        Ok(Poll::Ready(())) | Err(_) => {
                            cursor.stage = BroadcastStage::Unicasting(i + 1);
                        }
                        Ok(Poll::Pending) => return Poll::Pending,
                    }
                }
                BroadcastStage::Done => return Poll::Ready(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SHORT_LEN;
    use crate::frame::FramePoolStorage;

    struct FakeNeighbors {
        addrs: Vec<Vec<Address>>,
    }

    impl NeighborAddressSource for FakeNeighbors {
        fn len(&self) -> usize {
            self.addrs.len()
        }

        fn broadcast_capable_kinds(&self) -> &[AddressKind] {
            &[AddressKind::Uhf]
        }

        fn addresses(&self, index: usize) -> Option<&[Address]> {
            self.addrs.get(index).map(|v| v.as_slice())
        }
    }

    #[test]
    fn register_and_round_trip_a_frame() {
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        static STORAGE: FramePoolStorage = FramePoolStorage::new();
        let mut pool = STORAGE.take().unwrap();
        {
            let mut guard = BROKER.poll_lock().unwrap();
            guard.attach_medium(AddressKind::Uhf);
        }
        let mut socket = Socket::new(&BROKER, Protocol::ROUTING_NEIGHBOR).unwrap();
        let (_w, r) = pool.allocate(SHORT_LEN).unwrap();
        socket.poll_send_frame(Address::uhf(5), r).unwrap();

        let mut guard = BROKER.poll_lock().unwrap();
        let item = guard.poll_next_tx().unwrap();
        let dispatched = guard.poll_dispatch_received_frame(
            Protocol::ROUTING_NEIGHBOR,
            item.address,
            item.reader,
        );
        assert!(dispatched.is_ready());
        drop(guard);

        let frame = socket.poll_receive_frame().unwrap();
        assert_eq!(frame.protocol, Protocol::ROUTING_NEIGHBOR);
    }

    #[test]
    fn broadcast_visits_type_then_unicast_only_neighbors() {
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        static STORAGE: FramePoolStorage = FramePoolStorage::new();
        let mut pool = STORAGE.take().unwrap();
        {
            let mut guard = BROKER.poll_lock().unwrap();
            guard.attach_medium(AddressKind::Uhf);
            guard.attach_medium(AddressKind::Serial);
        }
        let mut socket = Socket::new(&BROKER, Protocol::ROUTING_NEIGHBOR).unwrap();
        let neighbors = FakeNeighbors {
            addrs: vec![vec![Address::serial(9)], vec![Address::uhf(4)]],
        };
        let (_w, r) = pool.allocate(SHORT_LEN).unwrap();
        let mut cursor = BroadcastCursor::new();
        let result = socket.poll_send_broadcast_frame(&r, &mut cursor, &neighbors);
        assert!(result.is_ready());

        let mut guard = BROKER.poll_lock().unwrap();
        let mut sent = Vec::new();
        while let Poll::Ready(item) = guard.poll_next_tx() {
            sent.push(item.address);
        }
        // one UHF broadcast, plus a unicast to the serial-only neighbor
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().any(|a| a.is_broadcast()));
        assert!(sent.iter().any(|a| a.as_serial_id() == Some(9)));
    }
}
