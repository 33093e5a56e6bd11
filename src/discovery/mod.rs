//! Reactive route discovery (`spec.md` §4.8, C9).
//!
//! Grounded in the original's `net/routing/reactive/discovery.h` for the
//! in-flight-request bookkeeping (`DiscoveryEntry`/`DiscoveryRequests`) and
//! `net/routing/reactive/service.h` for the handler's
//! Initial/RequestDiscovery/Discovering shape, collapsed here into one
//! stateless-per-call `poll_discover`: since a caller only keeps polling
//! while it gets `Pending` back, there is nothing to remember between calls
//! beyond what `DiscoveryRequests` already tracks.
//!
//! A node that isn't the target of a received `Request` or `Reply` relays
//! it one hop further rather than dropping it: `DiscoveryFrame::repeat`
//! folds in the relaying link's cost plus this node's own cost and claims
//! `sender_id`, then `handle_received` sends the result to a cached gateway
//! if one is already known for the target, or floods it onward otherwise —
//! matching `net/routing/reactive/task.h`'s `repeat_received_frame`.

pub mod cache;
pub mod frame;

use heapless::Vec as HVec;

use crate::config::{
    DISCOVERY_BETTER_RESPONSE_TIMEOUT_MS, DISCOVERY_FIRST_RESPONSE_TIMEOUT_MS, DISCOVER_INTERVAL_MS,
    MAX_CONCURRENT_DISCOVERIES,
};
use crate::frame::{FramePool, FrameReader, FrameWriter};
use crate::link::address::Address;
use crate::link::broker::Broker;
use crate::link::frame::Protocol;
use crate::link::socket::{BroadcastCursor, Socket};
use crate::lock::Lock;
use crate::neighbor::table::NeighborTable;
use crate::node::{Cost, NodeId};
use crate::poll::Poll;
use crate::ready;
use crate::rand::Rand;
use crate::serde::de::{Deserialize, DeserializeResult};
use crate::serde::ser::{Serialize, SerializeResult};
use crate::time::{Clock, Debounce, Duration, Instant};

use cache::{DiscoveryCache, FrameIdCache};
use frame::{DiscoveryFrame, DiscoveryFrameDeserializer, DiscoveryFrameKind, DiscoveryFrameSerializer};

/// The cheapest gateway found so far for one in-flight search.
#[derive(Debug, Clone)]
struct FoundGateway {
    gateway_id: NodeId,
    cost: Cost,
}

impl FoundGateway {
    /// Keeps the cheaper of the two options, returning whether `candidate`
    /// won.
    fn replace_if_cheaper(&mut self, candidate_gateway: NodeId, candidate_cost: Cost) -> bool {
        if candidate_cost < self.cost {
            self.gateway_id = candidate_gateway;
            self.cost = candidate_cost;
            true
        } else {
            false
        }
    }
}

struct DiscoveryEntry {
    target_id: NodeId,
    frame_id: u16,
    start: Instant,
    gateway: Option<FoundGateway>,
}

impl DiscoveryEntry {
    fn is_expired(&self, clock: &impl Clock) -> bool {
        let timeout = if self.gateway.is_some() {
            Duration::from_millis(DISCOVERY_BETTER_RESPONSE_TIMEOUT_MS)
        } else {
            Duration::from_millis(DISCOVERY_FIRST_RESPONSE_TIMEOUT_MS)
        };
        clock.now().checked_duration_since(self.start) >= timeout
    }

    fn on_gateway_found(&mut self, gateway_id: NodeId, cost: Cost) {
        match &mut self.gateway {
            Some(found) => {
                found.replace_if_cheaper(gateway_id, cost);
            }
            None => self.gateway = Some(FoundGateway { gateway_id, cost }),
        }
    }
}

/// Every discovery this node currently has in flight.
struct DiscoveryRequests {
    entries: HVec<DiscoveryEntry, MAX_CONCURRENT_DISCOVERIES>,
    debounce: Debounce,
}

impl DiscoveryRequests {
    fn new(clock: &impl Clock) -> Self {
        Self {
            entries: HVec::new(),
            debounce: Debounce::new(clock, Duration::from_millis(DISCOVER_INTERVAL_MS)),
        }
    }

    fn contains(&self, target_id: &NodeId) -> bool {
        self.entries.iter().any(|e| &e.target_id == target_id)
    }

    fn add(&mut self, target_id: NodeId, frame_id: u16, clock: &impl Clock) -> bool {
        if self.entries.is_full() {
            return false;
        }
        self.entries
            .push(DiscoveryEntry {
                target_id,
                frame_id,
                start: clock.now(),
                gateway: None,
            })
            .is_ok()
    }

    fn on_gateway_found(&mut self, frame_id: u16, target_id: &NodeId, gateway_id: NodeId, cost: Cost) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.frame_id == frame_id && &e.target_id == target_id)
        {
            entry.on_gateway_found(gateway_id, cost);
        }
    }

    /// Debounce-gated sweep: commits each expired entry's best gateway (if
    /// any) into `cache`, then drops the entry. Order is not preserved
    /// (`swap_remove`); nothing walks this table with a cursor the way the
    /// neighbor table's `Cursor` does, so that's fine. Returns the targets
    /// that expired with no gateway ever found, so the caller can surface a
    /// terminal "not found" once instead of silently forgetting the search.
    fn execute(
        &mut self,
        clock: &impl Clock,
        cache: &mut DiscoveryCache,
    ) -> HVec<NodeId, MAX_CONCURRENT_DISCOVERIES> {
        let mut failed = HVec::new();
        if self.debounce.poll(clock).is_pending() {
            return failed;
        }
        let mut idx = 0;
        while idx < self.entries.len() {
            if self.entries[idx].is_expired(clock) {
                let entry = self.entries.swap_remove(idx);
                match entry.gateway {
                    Some(found) => cache.add(entry.target_id, found.gateway_id),
                    None => {
                        let _ = failed.push(entry.target_id);
                    }
                }
            } else {
                idx += 1;
            }
        }
        failed
    }
}

enum SendStage {
    AwaitingPool(DiscoveryFrame),
    Writing {
        serializer: DiscoveryFrameSerializer,
        writer: FrameWriter,
        reader: FrameReader,
    },
    Sending {
        reader: FrameReader,
    },
}

/// Drives one outbound `DiscoveryFrame` to a single destination.
struct SendTask {
    dest: Address,
    stage: SendStage,
}

impl SendTask {
    fn new(dest: Address, frame: DiscoveryFrame) -> Self {
        Self {
            dest,
            stage: SendStage::AwaitingPool(frame),
        }
    }

    fn poll(&mut self, pool: &mut FramePool, socket: &mut Socket) -> Poll<()> {
        loop {
            match &mut self.stage {
                SendStage::AwaitingPool(frame) => {
                    let serializer = DiscoveryFrameSerializer::new(frame);
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
                        crate::mesh_warn!("discovery: frame too large for its own allocated buffer");
                        return Poll::Ready(());
                    }
                },
                SendStage::Sending { reader } => {
                    return match socket.poll_send_frame(self.dest.clone(), reader.subreader()) {
                        Ok(p) => p,
                        Err(_) => {
                            crate::mesh_debug!("discovery: send failed, dropping");
                            Poll::Ready(())
                        }
                    };
                }
            }
        }
    }
}

enum BroadcastStage {
    AwaitingPool(DiscoveryFrame),
    Writing {
        serializer: DiscoveryFrameSerializer,
        writer: FrameWriter,
        reader: FrameReader,
    },
    Broadcasting {
        reader: FrameReader,
        cursor: BroadcastCursor,
    },
}

/// Drives one outbound `Request` fanned out to every neighbor.
struct BroadcastTask {
    stage: BroadcastStage,
}

impl BroadcastTask {
    fn new(frame: DiscoveryFrame) -> Self {
        Self {
            stage: BroadcastStage::AwaitingPool(frame),
        }
    }

    fn poll(&mut self, pool: &mut FramePool, socket: &mut Socket, table: &NeighborTable) -> Poll<()> {
        loop {
            match &mut self.stage {
                BroadcastStage::AwaitingPool(frame) => {
                    let serializer = DiscoveryFrameSerializer::new(frame);
                    let length = serializer.serialized_length() as usize;
                    let (writer, reader) = ready!(pool.allocate(length));
                    self.stage = BroadcastStage::Writing {
                        serializer,
                        writer,
                        reader,
                    };
                }
                BroadcastStage::Writing {
                    serializer,
                    writer,
                    reader,
                } => match ready!(serializer.poll_serialize(writer)) {
                    SerializeResult::Ok => {
                        writer.shrink_frame_length_to_fit();
                        let reader = reader.subreader();
                        self.stage = BroadcastStage::Broadcasting {
                            reader,
                            cursor: BroadcastCursor::new(),
                        };
                    }
                    SerializeResult::NotEnoughLength => {
                        crate::mesh_warn!("discovery: request too large for its own allocated buffer");
                        return Poll::Ready(());
                    }
                },
                BroadcastStage::Broadcasting { reader, cursor } => {
                    return socket.poll_send_broadcast_frame(reader, cursor, table);
                }
            }
        }
    }
}

/// Reactive route discovery over the `ROUTING_REACTIVE` protocol.
pub struct DiscoveryService<'a, R> {
    socket: Socket<'a>,
    requests: DiscoveryRequests,
    cache: DiscoveryCache,
    seen_frames: FrameIdCache,
    /// Targets that timed out with no gateway found, surfaced once to the
    /// next matching `poll_discover` call rather than silently dropped.
    failed: HVec<NodeId, MAX_CONCURRENT_DISCOVERIES>,
    outbound: Option<SendTask>,
    broadcasting: Option<BroadcastTask>,
    rand: Rand<R>,
}

impl<'a, R: rand_core::RngCore> DiscoveryService<'a, R> {
    pub fn new(broker: &'a Lock<Broker>, clock: &impl Clock, rand: Rand<R>) -> Option<Self> {
        let socket = Socket::new(broker, Protocol::ROUTING_REACTIVE)?;
        Some(Self {
            socket,
            requests: DiscoveryRequests::new(clock),
            cache: DiscoveryCache::new(),
            seen_frames: FrameIdCache::new(),
            failed: HVec::new(),
            outbound: None,
            broadcasting: None,
            rand,
        })
    }

    /// Looks up (or starts looking up) a route to `target_id`. `Pending`
    /// while the search is still open; a caller should keep calling this
    /// once per tick with the same `target_id` until it gets a terminal
    /// [`crate::error::DiscoveryOutcome`] back: `Some(gateway)` if found,
    /// `None` if the search timed out with nothing found.
    pub fn poll_discover(
        &mut self,
        target_id: &NodeId,
        neighbors: &NeighborTable,
        clock: &impl Clock,
        local_id: &NodeId,
        local_cost: Cost,
    ) -> Poll<crate::error::DiscoveryOutcome> {
        if neighbors.contains(target_id) {
            return Poll::Ready(Some(target_id.clone()));
        }
        if let Some(gateway) = self.cache.get(target_id) {
            return Poll::Ready(Some(gateway.clone()));
        }
        if let Some(idx) = self.failed.iter().position(|id| id == target_id) {
            self.failed.swap_remove(idx);
            return Poll::Ready(None);
        }
        if self.requests.contains(target_id) {
            return Poll::Pending;
        }
        if self.requests.entries.is_full() {
            return Poll::Pending;
        }
        let frame_id = self.rand.gen_u16();
        let request = DiscoveryFrame::request(frame_id, local_id.clone(), local_cost, target_id.clone());
        self.requests.add(target_id.clone(), frame_id, clock);
        if self.broadcasting.is_none() {
            self.broadcasting = Some(BroadcastTask::new(request));
        }
        Poll::Pending
    }

    /// Whether a neighbor disconnecting should also purge cached routes
    /// that went through it.
    pub fn on_neighbor_removed(&mut self, gateway_id: &NodeId) {
        self.cache.remove_routes_through(gateway_id);
    }

    /// Advances inbound frame handling, any in-flight outbound send, and
    /// the request-expiration sweep by one scheduler tick. `local_cost` is
    /// this node's own per-hop cost contribution, folded into a relayed
    /// frame's running total the same way it seeds a freshly originated one
    /// (`spec.md` §4.8 step 6).
    pub fn execute(
        &mut self,
        pool: &mut FramePool,
        neighbors: &NeighborTable,
        clock: &impl Clock,
        local_id: &NodeId,
        local_cost: Cost,
    ) {
        self.poll_inbound(pool, neighbors, local_id, local_cost);
        self.poll_broadcast(pool, neighbors);
        for target in self.requests.execute(clock, &mut self.cache) {
            if self.failed.is_full() {
                self.failed.remove(0);
            }
            let _ = self.failed.push(target);
        }
    }

    fn poll_inbound(
        &mut self,
        pool: &mut FramePool,
        neighbors: &NeighborTable,
        local_id: &NodeId,
        local_cost: Cost,
    ) {
        if self.outbound.is_none() {
            if let Poll::Ready(mut frame) = self.socket.poll_receive_frame() {
                let mut de = DiscoveryFrameDeserializer::new();
                match de.poll_deserialize(&mut frame.reader) {
                    Poll::Ready(DeserializeResult::Ok) => {
                        self.handle_received(de.result(), frame.remote, neighbors, local_id, local_cost);
                    }
                    Poll::Ready(_) => {
                        crate::mesh_debug!("discovery: malformed frame, dropping");
                    }
                    Poll::Pending => {
                        crate::mesh_debug!("discovery: truncated frame, dropping");
                    }
                }
            }
        }
        if let Some(task) = &mut self.outbound {
            if task.poll(pool, &mut self.socket).is_ready() {
                self.outbound = None;
            }
        }
    }

    /// Implements `spec.md` §4.8's receive steps 1-6 in order: frame-id
    /// dedupe, neighbor-sender check, unconditional route-cache learning,
    /// then either answer/surface a result (we are the target) or relay the
    /// frame one hop further (we are not).
    fn handle_received(
        &mut self,
        parsed: DiscoveryFrame,
        remote: Address,
        neighbors: &NeighborTable,
        local_id: &NodeId,
        local_cost: Cost,
    ) {
        if !self.seen_frames.insert(parsed.frame_id) {
            return;
        }
        let sender_id = NodeId::new(remote);
        let Some(sender) = neighbors.get(&sender_id) else {
            crate::mesh_debug!("discovery: frame from a non-neighbor, dropping");
            return;
        };
        let link_cost = sender.link_cost;

        self.cache.add(parsed.source_id.clone(), sender_id.clone());

        if &parsed.target_id == local_id {
            match parsed.kind {
                DiscoveryFrameKind::Request => {
                    let reply = parsed.reply(local_id.clone());
                    if self.outbound.is_none() {
                        self.outbound = Some(SendTask::new(sender_id.address().clone(), reply));
                    }
                }
                DiscoveryFrameKind::Reply => {
                    self.requests
                        .on_gateway_found(parsed.frame_id, &parsed.source_id, sender_id, parsed.total_cost);
                }
            }
            return;
        }

        let repeated = parsed.repeat(local_id.clone(), link_cost + local_cost);
        let gateway_addr = self.cache.get(&repeated.target_id).map(|g| g.address().clone());
        match gateway_addr {
            Some(addr) => {
                if self.outbound.is_none() {
                    self.outbound = Some(SendTask::new(addr, repeated));
                }
            }
            None => {
                if self.broadcasting.is_none() {
                    self.broadcasting = Some(BroadcastTask::new(repeated));
                }
            }
        }
    }

    fn poll_broadcast(&mut self, pool: &mut FramePool, neighbors: &NeighborTable) {
        if let Some(task) = &mut self.broadcasting {
            if task.poll(pool, &mut self.socket, neighbors).is_ready() {
                self.broadcasting = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FramePoolStorage;
    use crate::link::address::AddressKind;
    use crate::link::broker::Broker;
    use crate::time::MockClock;
    use rand_chacha::ChaCha8Rng;
    use rand_chacha::rand_core::SeedableRng;

    fn id(b: u8) -> NodeId {
        NodeId::new(Address::uhf(b))
    }

    fn fresh_pool() -> FramePool {
        static STORAGE: FramePoolStorage = FramePoolStorage::new();
        STORAGE.take().expect("storage declared fresh per test")
    }

    fn rand() -> Rand<ChaCha8Rng> {
        Rand::new(ChaCha8Rng::seed_from_u64(7))
    }

    #[test]
    fn already_a_neighbor_resolves_immediately_without_a_request() {
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        let clock = MockClock::new();
        let mut neighbors = NeighborTable::new();
        neighbors.poll_add_neighbor_link(id(9), Address::uhf(9), Cost(1), &clock);
        let mut svc = DiscoveryService::new(&BROKER, &clock, rand()).unwrap();

        let result = svc.poll_discover(&id(9), &neighbors, &clock, &id(1), Cost(0));
        assert_eq!(result, Poll::Ready(Some(id(9))));
        assert!(!svc.requests.contains(&id(9)));
    }

    #[test]
    fn unknown_target_starts_a_request_and_pends() {
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        {
            let mut guard = BROKER.poll_lock().unwrap();
            guard.attach_medium(AddressKind::Uhf);
        }
        let clock = MockClock::new();
        let mut pool = fresh_pool();
        let neighbors = NeighborTable::new();
        let mut svc = DiscoveryService::new(&BROKER, &clock, rand()).unwrap();

        let result = svc.poll_discover(&id(9), &neighbors, &clock, &id(1), Cost(0));
        assert!(result.is_pending());
        assert!(svc.requests.contains(&id(9)));

        svc.execute(&mut pool, &neighbors, &clock, &id(1), Cost(0));
        let mut guard = BROKER.poll_lock().unwrap();
        let item = guard.poll_next_tx().unwrap();
        assert!(item.address.is_broadcast());
    }

    #[test]
    fn target_answers_a_request_addressed_to_it() {
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        {
            let mut guard = BROKER.poll_lock().unwrap();
            guard.attach_medium(AddressKind::Uhf);
        }
        let clock = MockClock::new();
        let mut pool = fresh_pool();
        let mut neighbors = NeighborTable::new();
        let remote = Address::uhf(5);
        neighbors.poll_add_neighbor_link(id(5), remote.clone(), Cost(1), &clock);
        let mut svc = DiscoveryService::new(&BROKER, &clock, rand()).unwrap();

        let request = DiscoveryFrame::request(11, id(5), Cost(0), id(1));
        let mut serializer = DiscoveryFrameSerializer::new(&request);
        let (mut w, r) = pool.allocate(serializer.serialized_length() as usize).unwrap();
        assert_eq!(serializer.poll_serialize(&mut w), Poll::Ready(SerializeResult::Ok));
        {
            let mut guard = BROKER.poll_lock().unwrap();
            let dispatched = guard.poll_dispatch_received_frame(Protocol::ROUTING_REACTIVE, remote.clone(), r);
            assert!(dispatched.is_ready());
        }

        svc.execute(&mut pool, &neighbors, &clock, &id(1), Cost(0));
        svc.execute(&mut pool, &neighbors, &clock, &id(1), Cost(0));

        let mut guard = BROKER.poll_lock().unwrap();
        let item = guard.poll_next_tx().unwrap();
        assert_eq!(item.address, remote);
    }

    #[test]
    fn relay_forwards_a_request_it_cannot_answer_itself() {
        // Two-hop discovery: A (id 1) floods a request for C (id 3); this
        // service plays B (id 2), A's neighbor but not C's, so it cannot
        // answer directly and must relay the request onward.
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        {
            let mut guard = BROKER.poll_lock().unwrap();
            guard.attach_medium(AddressKind::Uhf);
        }
        let clock = MockClock::new();
        let mut pool = fresh_pool();
        let mut neighbors = NeighborTable::new();
        let remote_a = Address::uhf(1);
        neighbors.poll_add_neighbor_link(id(1), remote_a.clone(), Cost(2), &clock);
        let mut svc = DiscoveryService::new(&BROKER, &clock, rand()).unwrap();

        let request = DiscoveryFrame::request(21, id(1), Cost(0), id(3));
        let mut serializer = DiscoveryFrameSerializer::new(&request);
        let (mut w, r) = pool.allocate(serializer.serialized_length() as usize).unwrap();
        assert_eq!(serializer.poll_serialize(&mut w), Poll::Ready(SerializeResult::Ok));
        {
            let mut guard = BROKER.poll_lock().unwrap();
            let dispatched = guard.poll_dispatch_received_frame(Protocol::ROUTING_REACTIVE, remote_a.clone(), r);
            assert!(dispatched.is_ready());
        }

        svc.execute(&mut pool, &neighbors, &clock, &id(2), Cost(1));
        svc.execute(&mut pool, &neighbors, &clock, &id(2), Cost(1));

        let mut guard = BROKER.poll_lock().unwrap();
        let item = guard.poll_next_tx().unwrap();
        assert!(item.address.is_broadcast());
        drop(guard);

        let mut reader = item.reader;
        let mut de = DiscoveryFrameDeserializer::new();
        assert_eq!(de.poll_deserialize(&mut reader), Poll::Ready(DeserializeResult::Ok));
        let relayed = de.result();
        assert_eq!(relayed.kind, DiscoveryFrameKind::Request);
        assert_eq!(relayed.frame_id, 21);
        assert_eq!(relayed.source_id, id(1));
        assert_eq!(relayed.target_id, id(3));
        assert_eq!(relayed.sender_id, id(2));
        // link cost A->B (2) plus B's own cost (1): cost accumulates per hop.
        assert_eq!(relayed.total_cost, Cost(3));

        // Learned en route even though this node was never the target.
        assert_eq!(svc.cache.get(&id(1)), Some(&id(1)));
    }

    #[test]
    fn expired_request_commits_best_gateway_to_cache() {
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        let clock = MockClock::new();
        let mut neighbors = NeighborTable::new();
        neighbors.poll_add_neighbor_link(id(5), Address::uhf(5), Cost(2), &clock);
        let mut svc = DiscoveryService::new(&BROKER, &clock, rand()).unwrap();

        svc.requests.add(id(9), 3, &clock);
        svc.requests.on_gateway_found(3, &id(9), id(5), Cost(2));

        clock.advance(Duration::from_millis(DISCOVERY_BETTER_RESPONSE_TIMEOUT_MS));
        svc.requests.execute(&clock, &mut svc.cache);

        assert!(!svc.requests.contains(&id(9)));
        assert_eq!(svc.cache.get(&id(9)), Some(&id(5)));
    }

    #[test]
    fn poll_discover_reports_not_found_exactly_once_after_timing_out() {
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        {
            let mut guard = BROKER.poll_lock().unwrap();
            guard.attach_medium(AddressKind::Uhf);
        }
        let clock = MockClock::new();
        let mut pool = fresh_pool();
        let neighbors = NeighborTable::new();
        let mut svc = DiscoveryService::new(&BROKER, &clock, rand()).unwrap();

        assert!(svc.poll_discover(&id(9), &neighbors, &clock, &id(1), Cost(0)).is_pending());

        clock.advance(Duration::from_millis(DISCOVERY_FIRST_RESPONSE_TIMEOUT_MS));
        svc.execute(&mut pool, &neighbors, &clock, &id(1), Cost(0));

        let result = svc.poll_discover(&id(9), &neighbors, &clock, &id(1), Cost(0));
        assert_eq!(result, Poll::Ready(None));

        // Consumed: a fresh search starts rather than repeating the stale verdict.
        let result = svc.poll_discover(&id(9), &neighbors, &clock, &id(1), Cost(0));
        assert!(result.is_pending());
    }
}
