//! One-hop neighbor discovery and liveness (`spec.md` §4.7, C8).
//!
//! Grounded in the original's `net/neighbor/service/hello.h` `SendHelloWorker`:
//! a received hello is answered with a unicast `HelloAck` back at the
//! address it arrived from, and either one refreshes the sender's entry in
//! the [`NeighborTable`]. A received `Goodbye` removes the sender outright.
//! Two independent hello mechanisms run every tick, matching
//! `SendHelloWorker`'s own `Broadcast`/`Unicast` split: [`NeighborService::poll_unicast_hello`]
//! walks the table for whichever neighbor's own `next_hello_deadline` has
//! elapsed and sends it a keep-alive on each known address, while
//! [`NeighborService::poll_broadcast_hello`] independently broadcasts on a
//! crate-wide debounce for auto-discovering neighbors not yet in the table,
//! gated by [`crate::config::ENABLE_AUTO_NEIGHBOR_DISCOVERY`]. Unlike the
//! original's single task slot shared between hello-sending and
//! frame-handling (gated by `poll_wait_for_task_addable`), this service
//! keeps the two hello mechanisms and the inbound-frame/reply pipeline as
//! three independent resumable tasks; contending for one shared slot bought
//! the original nothing but complexity once none of them blocks the others
//! on anything but the frame pool.

pub mod frame;
pub mod table;

use heapless::Deque;
use heapless::Vec as HVec;

use crate::config::{
    CHECK_NEIGHBOR_EXPIRATION_INTERVAL_MS, DEFAULT_LINK_COST, ENABLE_AUTO_NEIGHBOR_DISCOVERY,
    MAX_MEDIA_PER_NODE, NEIGHBOR_EVENT_QUEUE_DEPTH, NEIGHBOR_EXPIRATION_TIMEOUT_MS, SEND_HELLO_INTERVAL_MS,
};
use crate::frame::{FramePool, FrameReader, FrameWriter};
use crate::link::address::Address;
use crate::link::broker::Broker;
use crate::link::frame::Protocol;
use crate::link::socket::{BroadcastCursor, Socket};
use crate::lock::Lock;
use crate::node::{ClusterId, Cost, NodeId};
use crate::poll::Poll;
use crate::ready;
use crate::serde::ser::{Serialize, SerializeResult};
use crate::serde::de::{Deserialize, DeserializeResult};
use crate::time::{Clock, Debounce, Duration};

use frame::{GoodbyeFrame, HelloFrame, NeighborFrame, NeighborFrameDeserializer, NeighborFrameSerializer};
use table::NeighborTable;

/// A change this service has made to the neighbor table, for the rest of
/// the stack (reactive discovery, routing) to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeighborEvent {
    /// `id` is newly reachable, or its link cost strictly improved.
    Updated(NodeId),
    /// `id` said goodbye or its hello timed out.
    Removed(NodeId),
}

/// Drives one outbound `NeighborFrame` to a single destination: allocate a
/// frame, serialize into it, hand it to the socket.
enum SendStage {
    AwaitingPool(NeighborFrame),
    Writing {
        serializer: NeighborFrameSerializer,
        writer: FrameWriter,
        reader: FrameReader,
    },
    Sending {
        reader: FrameReader,
    },
}

struct SendTask {
    dest: Address,
    stage: SendStage,
}

impl SendTask {
    fn new(dest: Address, frame: NeighborFrame) -> Self {
        Self {
            dest,
            stage: SendStage::AwaitingPool(frame),
        }
    }

    fn poll(&mut self, pool: &mut FramePool, socket: &mut Socket) -> Poll<()> {
        loop {
            match &mut self.stage {
                SendStage::AwaitingPool(frame) => {
                    let serializer = NeighborFrameSerializer::new(frame);
                    let length = serializer.serialized_length() as usize;
                    let (writer, reader) = ready!(pool.allocate(length));
                    self.stage = SendStage::Writing {
                        serializer,
                        writer,
                        reader,
                    };
                }
                SendStage::Writing {
                    serializer,
                    writer,
                    reader,
                } => match ready!(serializer.poll_serialize(writer)) {
                    SerializeResult::Ok => {
                        writer.shrink_frame_length_to_fit();
                        let reader = reader.subreader();
                        self.stage = SendStage::Sending { reader };
                    }
                    SerializeResult::NotEnoughLength => {
                        crate::mesh_warn!("neighbor: frame too large for its own allocated buffer");
                        return Poll::Ready(());
                    }
                },
                SendStage::Sending { reader } => {
                    return match socket.poll_send_frame(self.dest.clone(), reader.subreader()) {
                        Ok(p) => p,
                        Err(_) => {
                            crate::mesh_debug!("neighbor: send failed, dropping");
                            Poll::Ready(())
                        }
                    };
                }
            }
        }
    }
}

/// Drives the periodic hello broadcast: same pool/serialize pipeline as
/// [`SendTask`], but fanned out over every neighbor via
/// [`Socket::poll_send_broadcast_frame`] instead of a single destination.
enum HelloStage {
    AwaitingPool(NeighborFrame),
    Writing {
        serializer: NeighborFrameSerializer,
        writer: FrameWriter,
        reader: FrameReader,
    },
    Broadcasting {
        reader: FrameReader,
        cursor: BroadcastCursor,
    },
}

struct HelloTask {
    stage: HelloStage,
}

impl HelloTask {
    fn new(frame: NeighborFrame) -> Self {
        Self {
            stage: HelloStage::AwaitingPool(frame),
        }
    }

    fn poll(&mut self, pool: &mut FramePool, socket: &mut Socket, table: &NeighborTable) -> Poll<()> {
        loop {
            match &mut self.stage {
                HelloStage::AwaitingPool(frame) => {
                    let serializer = NeighborFrameSerializer::new(frame);
                    let length = serializer.serialized_length() as usize;
                    let (writer, reader) = ready!(pool.allocate(length));
                    self.stage = HelloStage::Writing {
                        serializer,
                        writer,
                        reader,
                    };
                }
                HelloStage::Writing {
                    serializer,
                    writer,
                    reader,
                } => match ready!(serializer.poll_serialize(writer)) {
                    SerializeResult::Ok => {
                        writer.shrink_frame_length_to_fit();
                        let reader = reader.subreader();
                        self.stage = HelloStage::Broadcasting {
                            reader,
                            cursor: BroadcastCursor::new(),
                        };
                    }
                    SerializeResult::NotEnoughLength => {
                        crate::mesh_warn!("neighbor: hello frame too large for its own allocated buffer");
                        return Poll::Ready(());
                    }
                },
                HelloStage::Broadcasting { reader, cursor } => {
                    return socket.poll_send_broadcast_frame(reader, cursor, table);
                }
            }
        }
    }
}

/// Neighbor liveness: hello/ack keepalive and goodbye teardown, over the
/// `ROUTING_NEIGHBOR` protocol.
pub struct NeighborService<'a> {
    table: NeighborTable,
    socket: Socket<'a>,
    hello_debounce: Debounce,
    expire_debounce: Debounce,
    hello: Option<HelloTask>,
    /// Drives one unicast keep-alive hello at a time, one neighbor-address
    /// at a time, independent of the broadcast auto-discovery hello above.
    unicast_hello: Option<SendTask>,
    /// Addresses still owed a unicast hello for whichever neighbor
    /// [`NeighborTable::poll_next_due_hello`] most recently returned.
    unicast_hello_queue: HVec<Address, MAX_MEDIA_PER_NODE>,
    inbound: Option<SendTask>,
    events: Deque<NeighborEvent, NEIGHBOR_EVENT_QUEUE_DEPTH>,
}

impl<'a> NeighborService<'a> {
    pub fn new(broker: &'a Lock<Broker>, clock: &impl Clock) -> Option<Self> {
        let socket = Socket::new(broker, Protocol::ROUTING_NEIGHBOR)?;
        Some(Self {
            table: NeighborTable::new(),
            socket,
            hello_debounce: Debounce::new(clock, Duration::from_millis(SEND_HELLO_INTERVAL_MS)),
            expire_debounce: Debounce::new(clock, Duration::from_millis(CHECK_NEIGHBOR_EXPIRATION_INTERVAL_MS)),
            hello: None,
            unicast_hello: None,
            unicast_hello_queue: HVec::new(),
            inbound: None,
            events: Deque::new(),
        })
    }

    pub fn table(&self) -> &NeighborTable {
        &self.table
    }

    /// Whether `id` is currently a known one-hop neighbor; used by reactive
    /// discovery to short-circuit a search for an already-adjacent target.
    pub fn has_neighbor(&self, id: &NodeId) -> bool {
        self.table.contains(id)
    }

    /// Drains one queued [`NeighborEvent`]. Oldest-first; if the queue is
    /// full, newly pushed events evict the oldest rather than being
    /// dropped themselves, so a slow consumer still sees the most recent
    /// topology.
    pub fn poll_next_event(&mut self) -> Poll<NeighborEvent> {
        match self.events.pop_front() {
            Some(event) => Poll::Ready(event),
            None => Poll::Pending,
        }
    }

    fn push_event(&mut self, event: NeighborEvent) {
        if self.events.is_full() {
            self.events.pop_front();
        }
        let _ = self.events.push_back(event);
    }

    /// Advances received-frame handling, the periodic hello broadcast, and
    /// the expiration sweep by one scheduler tick.
    pub fn execute(
        &mut self,
        pool: &mut FramePool,
        clock: &impl Clock,
        local_id: &NodeId,
        local_cluster_id: ClusterId,
        local_cost: Cost,
    ) {
        self.poll_inbound(pool, clock, local_id, local_cluster_id, local_cost);
        self.poll_hello(pool, clock, local_id, local_cluster_id, local_cost);
        self.poll_expire(clock);
    }

    /// Directly goodbyes a known neighbor, e.g. before this node shuts
    /// down a link deliberately rather than letting it time out.
    pub fn request_send_goodbye(&mut self, destination: NodeId, local_id: &NodeId) {
        let Some(addr) = self.table.get(&destination).and_then(|n| n.addresses.first()).cloned() else {
            crate::mesh_debug!("neighbor: goodbye requested for unknown neighbor, dropping");
            return;
        };
        self.table.remove_neighbor_node(&destination);
        self.push_event(NeighborEvent::Removed(destination));
        let frame = NeighborFrame::Goodbye(GoodbyeFrame {
            sender_id: local_id.clone(),
        });
        // Best-effort: if a reply/hello is mid-flight this is dropped, same
        // as any other frame racing the single inbound slot.
        if self.inbound.is_none() {
            self.inbound = Some(SendTask::new(addr, frame));
        }
    }

    fn poll_inbound(
        &mut self,
        pool: &mut FramePool,
        clock: &impl Clock,
        local_id: &NodeId,
        local_cluster_id: ClusterId,
        local_cost: Cost,
    ) {
        if self.inbound.is_none() {
            if let Poll::Ready(mut frame) = self.socket.poll_receive_frame() {
                let mut de = NeighborFrameDeserializer::new();
                match de.poll_deserialize(&mut frame.reader) {
                    Poll::Ready(DeserializeResult::Ok) => {
                        self.handle_received(
                            de.result(),
                            frame.remote,
                            clock,
                            local_id,
                            local_cluster_id,
                            local_cost,
                        );
                    }
                    Poll::Ready(_) => {
                        crate::mesh_debug!("neighbor: malformed frame, dropping");
                    }
                    Poll::Pending => {
                        crate::mesh_debug!("neighbor: truncated frame, dropping");
                    }
                }
            }
        }
        if let Some(task) = &mut self.inbound {
            if task.poll(pool, &mut self.socket).is_ready() {
                self.inbound = None;
            }
        }
    }

    fn handle_received(
        &mut self,
        parsed: NeighborFrame,
        remote: Address,
        clock: &impl Clock,
        local_id: &NodeId,
        local_cluster_id: ClusterId,
        local_cost: Cost,
    ) {
        match parsed {
            NeighborFrame::Hello(h) => {
                let changed =
                    self.table
                        .poll_add_neighbor_link(h.sender_id.clone(), remote.clone(), h.link_cost, clock);
                if let Poll::Ready(Some(id)) = changed {
                    self.push_event(NeighborEvent::Updated(id));
                }
                if !h.is_ack {
                    let reply = HelloFrame {
                        is_ack: true,
                        sender_id: local_id.clone(),
                        sender_cluster_id: local_cluster_id,
                        node_cost: local_cost,
                        link_cost: h.link_cost,
                    };
                    self.inbound = Some(SendTask::new(remote, NeighborFrame::Hello(reply)));
                }
            }
            NeighborFrame::Goodbye(g) => {
                if self.table.remove_neighbor_node(&g.sender_id).is_some() {
                    self.push_event(NeighborEvent::Removed(g.sender_id));
                }
            }
        }
    }

    fn poll_hello(
        &mut self,
        pool: &mut FramePool,
        clock: &impl Clock,
        local_id: &NodeId,
        local_cluster_id: ClusterId,
        local_cost: Cost,
    ) {
        self.poll_unicast_hello(pool, clock, local_id, local_cluster_id, local_cost);
        self.poll_broadcast_hello(pool, clock, local_id, local_cluster_id, local_cost);
    }

    /// Per-neighbor keep-alive: walks every neighbor's own
    /// `next_hello_deadline` and sends a unicast hello to each of its known
    /// addresses once due, independent of whether auto-discovery
    /// broadcasting is enabled (`spec.md` §4.7).
    fn poll_unicast_hello(
        &mut self,
        pool: &mut FramePool,
        clock: &impl Clock,
        local_id: &NodeId,
        local_cluster_id: ClusterId,
        local_cost: Cost,
    ) {
        if self.unicast_hello.is_none() {
            if self.unicast_hello_queue.is_empty() {
                if let Some((_, addresses)) = self.table.poll_next_due_hello(clock) {
                    self.unicast_hello_queue = addresses;
                }
            }
            if let Some(addr) = self.unicast_hello_queue.pop() {
                let frame = NeighborFrame::Hello(HelloFrame {
                    is_ack: false,
                    sender_id: local_id.clone(),
                    sender_cluster_id: local_cluster_id,
                    node_cost: local_cost,
                    link_cost: Cost(DEFAULT_LINK_COST),
                });
                self.unicast_hello = Some(SendTask::new(addr, frame));
            }
        }
        if let Some(task) = &mut self.unicast_hello {
            if task.poll(pool, &mut self.socket).is_ready() {
                self.unicast_hello = None;
            }
        }
    }

    /// Auto-discovery broadcast: a crate-wide debounce fans a hello out to
    /// every broadcast-capable address, for finding neighbors this node
    /// doesn't have a table entry for yet. Separately toggleable from the
    /// per-neighbor unicast hellos above via
    /// [`crate::config::ENABLE_AUTO_NEIGHBOR_DISCOVERY`].
    fn poll_broadcast_hello(
        &mut self,
        pool: &mut FramePool,
        clock: &impl Clock,
        local_id: &NodeId,
        local_cluster_id: ClusterId,
        local_cost: Cost,
    ) {
        if !ENABLE_AUTO_NEIGHBOR_DISCOVERY {
            return;
        }
        if self.hello.is_none() {
            if self.hello_debounce.poll(clock).is_pending() {
                return;
            }
            let frame = NeighborFrame::Hello(HelloFrame {
                is_ack: false,
                sender_id: local_id.clone(),
                sender_cluster_id: local_cluster_id,
                node_cost: local_cost,
                link_cost: Cost(DEFAULT_LINK_COST),
            });
            self.hello = Some(HelloTask::new(frame));
        }
        if let Some(task) = &mut self.hello {
            if task.poll(pool, &mut self.socket, &self.table).is_ready() {
                self.hello = None;
            }
        }
    }

    fn poll_expire(&mut self, clock: &impl Clock) {
        if self.expire_debounce.poll(clock).is_pending() {
            return;
        }
        if let Poll::Ready(id) =
            self.table
                .poll_expire_one(clock, Duration::from_millis(NEIGHBOR_EXPIRATION_TIMEOUT_MS))
        {
            self.push_event(NeighborEvent::Removed(id));
        }
    }
}

#[cfg(test)]
mod service_tests {
    use super::*;
    use crate::frame::FramePoolStorage;
    use crate::link::address::AddressKind;
    use crate::link::broker::Broker;
    use crate::time::MockClock;

    fn fresh_pool() -> FramePool {
        static STORAGE: FramePoolStorage = FramePoolStorage::new();
        STORAGE.take().expect("storage declared fresh per test")
    }

    fn send_neighbor_frame(broker: &Lock<Broker>, pool: &mut FramePool, remote: Address, frame: &NeighborFrame) {
        let mut serializer = NeighborFrameSerializer::new(frame);
        let (mut w, r) = pool.allocate(serializer.serialized_length() as usize).unwrap();
        assert_eq!(serializer.poll_serialize(&mut w), Poll::Ready(SerializeResult::Ok));
        let mut guard = broker.poll_lock().unwrap();
        let dispatched = guard.poll_dispatch_received_frame(Protocol::ROUTING_NEIGHBOR, remote, r);
        assert!(dispatched.is_ready());
    }

    #[test]
    fn hello_received_registers_neighbor_and_queues_ack() {
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        let mut pool = fresh_pool();
        {
            let mut guard = BROKER.poll_lock().unwrap();
            guard.attach_medium(AddressKind::Uhf);
        }
        let clock = MockClock::new();
        let local_id = NodeId::new(Address::uhf(1));
        let mut svc = NeighborService::new(&BROKER, &clock).unwrap();

        let remote = Address::uhf(9);
        let hello = NeighborFrame::Hello(HelloFrame {
            is_ack: false,
            sender_id: NodeId::new(remote.clone()),
            sender_cluster_id: ClusterId(0),
            node_cost: Cost(3),
            link_cost: Cost(2),
        });
        send_neighbor_frame(&BROKER, &mut pool, remote.clone(), &hello);

        svc.execute(&mut pool, &clock, &local_id, ClusterId(1), Cost(0));
        svc.execute(&mut pool, &clock, &local_id, ClusterId(1), Cost(0));

        assert!(svc.has_neighbor(&NodeId::new(remote.clone())));
        assert_eq!(
            svc.poll_next_event(),
            Poll::Ready(NeighborEvent::Updated(NodeId::new(remote.clone())))
        );

        let mut guard = BROKER.poll_lock().unwrap();
        let item = guard.poll_next_tx().unwrap();
        assert_eq!(item.address, remote);
    }

    #[test]
    fn goodbye_received_removes_neighbor_and_emits_event() {
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        let mut pool = fresh_pool();
        {
            let mut guard = BROKER.poll_lock().unwrap();
            guard.attach_medium(AddressKind::Uhf);
        }
        let clock = MockClock::new();
        let local_id = NodeId::new(Address::uhf(1));
        let mut svc = NeighborService::new(&BROKER, &clock).unwrap();

        let remote = Address::uhf(9);
        svc.table
            .poll_add_neighbor_link(NodeId::new(remote.clone()), remote.clone(), Cost(1), &clock);
        assert!(svc.has_neighbor(&NodeId::new(remote.clone())));

        let goodbye = NeighborFrame::Goodbye(GoodbyeFrame {
            sender_id: NodeId::new(remote.clone()),
        });
        send_neighbor_frame(&BROKER, &mut pool, remote.clone(), &goodbye);
        svc.execute(&mut pool, &clock, &local_id, ClusterId(1), Cost(0));

        assert!(!svc.has_neighbor(&NodeId::new(remote.clone())));
        assert_eq!(
            svc.poll_next_event(),
            Poll::Ready(NeighborEvent::Removed(NodeId::new(remote)))
        );
    }

    #[test]
    fn hello_broadcasts_on_debounce_interval() {
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        let mut pool = fresh_pool();
        {
            let mut guard = BROKER.poll_lock().unwrap();
            guard.attach_medium(AddressKind::Uhf);
        }
        let clock = MockClock::new();
        let local_id = NodeId::new(Address::uhf(1));
        let mut svc = NeighborService::new(&BROKER, &clock).unwrap();

        clock.advance(Duration::from_millis(SEND_HELLO_INTERVAL_MS));
        svc.execute(&mut pool, &clock, &local_id, ClusterId(0), Cost(0));

        let mut guard = BROKER.poll_lock().unwrap();
        let item = guard.poll_next_tx().unwrap();
        assert!(item.address.is_broadcast());
    }

    #[test]
    fn unicast_keep_alive_sent_once_that_neighbors_own_deadline_elapses() {
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        let mut pool = fresh_pool();
        {
            let mut guard = BROKER.poll_lock().unwrap();
            guard.attach_medium(AddressKind::Uhf);
        }
        let clock = MockClock::new();
        let local_id = NodeId::new(Address::uhf(1));
        let mut svc = NeighborService::new(&BROKER, &clock).unwrap();

        let remote = Address::uhf(9);
        svc.table
            .poll_add_neighbor_link(NodeId::new(remote.clone()), remote.clone(), Cost(1), &clock);

        clock.advance(Duration::from_millis(SEND_HELLO_INTERVAL_MS));
        svc.execute(&mut pool, &clock, &local_id, ClusterId(0), Cost(0));

        // The per-neighbor unicast keep-alive is queued ahead of the
        // crate-wide auto-discovery broadcast, which is also due this tick.
        let mut guard = BROKER.poll_lock().unwrap();
        let item = guard.poll_next_tx().unwrap();
        assert_eq!(item.address, remote);
        let mut reader = item.reader;
        let mut de = NeighborFrameDeserializer::new();
        assert_eq!(de.poll_deserialize(&mut reader), Poll::Ready(DeserializeResult::Ok));
        match de.result() {
            NeighborFrame::Hello(h) => assert!(!h.is_ack),
            other => panic!("expected a Hello, got {other:?}"),
        }
    }
}
