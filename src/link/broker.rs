//! Frame broker: per-protocol fan-in/fan-out between sockets and media
//! drivers (`spec.md` §4.4).

use heapless::Deque;
use heapless::Vec as HVec;

use crate::config::{MAX_ATTACHED_MEDIA, MAX_SOCKETS, RX_QUEUE_DEPTH, TX_QUEUE_DEPTH};
use crate::error::SendError;
use crate::frame::FrameReader;
use crate::link::address::{Address, AddressKind};
use crate::link::frame::{LinkFrame, Protocol};
use crate::poll::Poll;

/// An outbound frame waiting for a media driver to drain it.
pub struct TxItem {
    pub protocol: Protocol,
    pub address: Address,
    pub reader: FrameReader,
}

/// Opaque handle identifying a socket's registration with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketHandle(usize);

struct RxSlot {
    protocol: Option<Protocol>,
    queue: Deque<LinkFrame, RX_QUEUE_DEPTH>,
}

impl RxSlot {
    const fn new() -> Self {
        Self {
            protocol: None,
            queue: Deque::new(),
        }
    }
}

/// Owns the TX queue fed by sockets and one RX inbox per registered socket.
pub struct Broker {
    tx: Deque<TxItem, TX_QUEUE_DEPTH>,
    rx: [RxSlot; MAX_SOCKETS],
    attached_media: HVec<AddressKind, MAX_ATTACHED_MEDIA>,
}

impl Broker {
    pub const fn new() -> Self {
        const SLOT: RxSlot = RxSlot::new();
        Self {
            tx: Deque::new(),
            rx: [SLOT; MAX_SOCKETS],
            attached_media: HVec::new(),
        }
    }

    /// Declares that a medium supporting `kind` destinations is attached.
    /// Called once per media driver at startup.
    pub fn attach_medium(&mut self, kind: AddressKind) {
        if !self.attached_media.contains(&kind) {
            self.attached_media.push(kind).ok();
        }
    }

    fn supports(&self, kind: AddressKind) -> bool {
        self.attached_media.contains(&kind)
    }

    /// Registers a new socket for `protocol`. `None` if no slot is free.
    pub fn register(&mut self, protocol: Protocol) -> Option<SocketHandle> {
        let idx = self.rx.iter().position(|s| s.protocol.is_none())?;
        self.rx[idx].protocol = Some(protocol);
        Some(SocketHandle(idx))
    }

    /// Hands a received frame to the socket registered for `protocol`.
    /// `Pending` if that socket's inbox is full; silently dropped (after
    /// logging) if no socket is registered for `protocol`.
    pub fn poll_dispatch_received_frame(
        &mut self,
        protocol: Protocol,
        source: Address,
        reader: FrameReader,
    ) -> Poll<()> {
        let Some(slot) = self
            .rx
            .iter_mut()
            .find(|s| s.protocol == Some(protocol))
        else {
            crate::mesh_debug!("broker: no socket registered for protocol, dropping frame");
            return Poll::Ready(());
        };
        match slot.queue.push_back(LinkFrame {
            protocol,
            remote: source,
            reader,
        }) {
            Ok(()) => Poll::Ready(()),
            Err(_) => Poll::Pending,
        }
    }

    pub(crate) fn poll_dequeue_rx(&mut self, handle: SocketHandle) -> Poll<LinkFrame> {
        match self.rx[handle.0].queue.pop_front() {
            Some(frame) => Poll::Ready(frame),
            None => Poll::Pending,
        }
    }

    pub(crate) fn poll_enqueue_tx(
        &mut self,
        address: Address,
        protocol: Protocol,
        reader: FrameReader,
    ) -> Result<Poll<()>, SendError> {
        if !self.supports(address.kind()) {
            return Err(SendError::SupportedMediaNotFound);
        }
        match self.tx.push_back(TxItem {
            protocol,
            address,
            reader,
        }) {
            Ok(()) => Ok(Poll::Ready(())),
            Err(_) => Ok(Poll::Pending),
        }
    }

    /// Pulls the next outbound frame, for a media driver to drain. Drivers
    /// are expected to filter by whether they can carry the destination's
    /// address kind and requeue (or drop) items they can't.
    pub fn poll_next_tx(&mut self) -> Poll<TxItem> {
        match self.tx.pop_front() {
            Some(item) => Poll::Ready(item),
            None => Poll::Pending,
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
