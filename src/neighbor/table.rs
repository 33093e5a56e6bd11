//! Neighbor table: one-hop neighbors, their addresses, and liveness
//! (`spec.md` §4.7).
//!
//! Grounded in the original's richer `net/neighbor/table.h` (the variant
//! with cursors and timeouts, not the simpler port-mask-based
//! `net/neighbor/service/*` table). Unlike the original's shared-pointer
//! `NeighborListCursor`/`NeighborListCursorRef` pair, the single-threaded
//! model here only needs a small slab of `Option<usize>` cursor slots owned
//! by the table itself.

use heapless::Vec as HVec;

use crate::config::{
    MAX_MEDIA_PER_NODE, MAX_NEIGHBOR_LIST_CURSOR_COUNT, MAX_NEIGHBOR_NODE_COUNT, SEND_HELLO_INTERVAL_MS,
};
use crate::link::address::{Address, AddressKind};
use crate::link::socket::NeighborAddressSource;
use crate::node::{Cost, NodeId};
use crate::poll::Poll;
use crate::time::{Clock, Duration, Instant};

/// One known one-hop neighbor.
#[derive(Debug, Clone)]
pub struct NeighborNode {
    pub id: NodeId,
    pub link_cost: Cost,
    pub addresses: HVec<Address, MAX_MEDIA_PER_NODE>,
    last_seen: Instant,
    /// When this specific neighbor is next due a unicast keep-alive hello
    /// (`spec.md` §4.7's `next_hello`), independent of every other
    /// neighbor's own deadline.
    next_hello_deadline: Instant,
}

impl NeighborNode {
    fn add_address_if_not_exists(&mut self, addr: Address) {
        if !self.addresses.contains(&addr) {
            self.addresses.push(addr).ok();
        }
    }

    /// Whether this neighbor's own keep-alive deadline has elapsed.
    pub fn hello_due(&self, clock: &impl Clock) -> bool {
        clock.now() >= self.next_hello_deadline
    }
}

/// A handle into the table's cursor slab, walking neighbors one at a time
/// across calls (used to spread per-neighbor work, like hello sends, across
/// scheduler ticks rather than doing it all in one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(usize);

const BROADCAST_CAPABLE_KINDS: [AddressKind; 1] = [AddressKind::Uhf];

pub struct NeighborTable {
    nodes: HVec<NeighborNode, MAX_NEIGHBOR_NODE_COUNT>,
    cursors: [Option<usize>; MAX_NEIGHBOR_LIST_CURSOR_COUNT],
}

impl NeighborTable {
    pub const fn new() -> Self {
        Self {
            nodes: HVec::new(),
            cursors: [None; MAX_NEIGHBOR_LIST_CURSOR_COUNT],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn find_index(&self, id: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| &n.id == id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&NeighborNode> {
        self.find_index(id).map(|idx| &self.nodes[idx])
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.find_index(id).is_some()
    }

    /// Registers (or refreshes) a link to `id` over `addr` at `link_cost`.
    /// The new and old link costs are compared and the smaller one is kept
    /// silently; only a strict change in the kept cost is reported as an
    /// update (`spec.md` §4.7's link-cost selection tie-break). `Pending` if
    /// `id` is unknown and the table has no room for a new entry.
    pub fn poll_add_neighbor_link(
        &mut self,
        id: NodeId,
        addr: Address,
        link_cost: Cost,
        clock: &impl Clock,
    ) -> Poll<Option<NodeId>> {
        match self.find_index(&id) {
            Some(idx) => {
                let node = &mut self.nodes[idx];
                node.last_seen = clock.now();
                node.add_address_if_not_exists(addr);
                let kept = if link_cost.0 < node.link_cost.0 {
                    link_cost
                } else {
                    node.link_cost
                };
                let changed = kept != node.link_cost;
                node.link_cost = kept;
                Poll::Ready(changed.then_some(id))
            }
            None => {
                if self.nodes.is_full() {
                    return Poll::Pending;
                }
                let mut addresses = HVec::new();
                addresses.push(addr).ok();
                self.nodes
                    .push(NeighborNode {
                        id: id.clone(),
                        link_cost,
                        addresses,
                        last_seen: clock.now(),
                        next_hello_deadline: clock.now() + Duration::from_millis(SEND_HELLO_INTERVAL_MS),
                    })
                    .ok();
                Poll::Ready(Some(id))
            }
        }
    }

    /// Removes `id`, shifting later entries down to keep table order. Every
    /// live cursor with an index greater than the removed one is decremented
    /// to point at the same logical neighbor it did before; a cursor
    /// pointing exactly at the removed index is left alone, so it advances
    /// to what was the next neighbor.
    pub fn remove_neighbor_node(&mut self, id: &NodeId) -> Option<NeighborNode> {
        let idx = self.find_index(id)?;
        let removed = self.nodes.remove(idx);
        for cursor in self.cursors.iter_mut().flatten() {
            if *cursor > idx {
                *cursor -= 1;
            }
        }
        Some(removed)
    }

    /// Finds and removes the first entry whose last refresh is older than
    /// `timeout`. Only one entry per call, so a burst of simultaneous
    /// expirations drains across several scheduler ticks.
    pub fn poll_expire_one(&mut self, clock: &impl Clock, timeout: Duration) -> Poll<NodeId> {
        let now = clock.now();
        let idx = self
            .nodes
            .iter()
            .position(|n| now.checked_duration_since(n.last_seen) >= timeout);
        match idx {
            Some(idx) => {
                let id = self.nodes[idx].id.clone();
                self.remove_neighbor_node(&id);
                Poll::Ready(id)
            }
            None => Poll::Pending,
        }
    }

    /// Finds the first neighbor whose own keep-alive deadline has elapsed,
    /// pushes its deadline out another interval, and returns its id and
    /// known addresses for the caller to send unicast hellos to
    /// (`spec.md` §4.7: "a periodic worker polls each neighbor's `next_hello`
    /// deadline and sends keep-alive hellos on every known address of that
    /// neighbor"). `None` if nothing is due yet.
    pub fn poll_next_due_hello(&mut self, clock: &impl Clock) -> Option<(NodeId, HVec<Address, MAX_MEDIA_PER_NODE>)> {
        let idx = self.nodes.iter().position(|n| n.hello_due(clock))?;
        let node = &mut self.nodes[idx];
        node.next_hello_deadline = clock.now() + Duration::from_millis(SEND_HELLO_INTERVAL_MS);
        Some((node.id.clone(), node.addresses.clone()))
    }

    pub fn acquire_cursor(&mut self) -> Option<Cursor> {
        let slot = self.cursors.iter().position(Option::is_none)?;
        self.cursors[slot] = Some(0);
        Some(Cursor(slot))
    }

    pub fn release_cursor(&mut self, cursor: Cursor) {
        self.cursors[cursor.0] = None;
    }

    /// Returns the neighbor `cursor` currently points at and advances it.
    /// `None` once the cursor has walked past the last entry; call
    /// [`Self::reset_cursor`] to start another pass.
    pub fn poll_cursor_next(&mut self, cursor: &Cursor) -> Option<&NeighborNode> {
        let idx = self.cursors[cursor.0]?;
        if idx >= self.nodes.len() {
            return None;
        }
        self.cursors[cursor.0] = Some(idx + 1);
        Some(&self.nodes[idx])
    }

    pub fn reset_cursor(&mut self, cursor: &Cursor) {
        self.cursors[cursor.0] = Some(0);
    }
}

impl Default for NeighborTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NeighborAddressSource for NeighborTable {
    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn broadcast_capable_kinds(&self) -> &[AddressKind] {
        &BROADCAST_CAPABLE_KINDS
    }

    fn addresses(&self, index: usize) -> Option<&[Address]> {
        self.nodes.get(index).map(|n| n.addresses.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::MockClock;

    fn id(b: u8) -> NodeId {
        NodeId::new(Address::uhf(b))
    }

    #[test]
    fn new_neighbor_is_always_an_update() {
        let clock = MockClock::new();
        let mut table = NeighborTable::new();
        let result = table.poll_add_neighbor_link(id(1), Address::uhf(1), Cost(5), &clock);
        assert_eq!(result, Poll::Ready(Some(id(1))));
        assert_eq!(table.get(&id(1)).unwrap().link_cost, Cost(5));
    }

    #[test]
    fn cheaper_link_cost_updates_silently_reported_only_on_strict_change() {
        let clock = MockClock::new();
        let mut table = NeighborTable::new();
        table.poll_add_neighbor_link(id(1), Address::uhf(1), Cost(5), &clock);

        // A more expensive report is kept silent: the smaller cost wins.
        let result = table.poll_add_neighbor_link(id(1), Address::uhf(1), Cost(9), &clock);
        assert_eq!(result, Poll::Ready(None));
        assert_eq!(table.get(&id(1)).unwrap().link_cost, Cost(5));

        // A strictly cheaper report is a real update.
        let result = table.poll_add_neighbor_link(id(1), Address::uhf(1), Cost(2), &clock);
        assert_eq!(result, Poll::Ready(Some(id(1))));
        assert_eq!(table.get(&id(1)).unwrap().link_cost, Cost(2));
    }

    #[test]
    fn refreshing_same_cost_is_not_reported() {
        let clock = MockClock::new();
        let mut table = NeighborTable::new();
        table.poll_add_neighbor_link(id(1), Address::uhf(1), Cost(5), &clock);
        let result = table.poll_add_neighbor_link(id(1), Address::uhf(1), Cost(5), &clock);
        assert_eq!(result, Poll::Ready(None));
    }

    #[test]
    fn second_address_is_tracked_alongside_the_first() {
        let clock = MockClock::new();
        let mut table = NeighborTable::new();
        table.poll_add_neighbor_link(id(1), Address::uhf(1), Cost(5), &clock);
        table.poll_add_neighbor_link(id(1), Address::serial(9), Cost(5), &clock);
        assert_eq!(table.get(&id(1)).unwrap().addresses.len(), 2);
    }

    #[test]
    fn cursor_at_removed_index_advances_to_successor_others_shift() {
        let clock = MockClock::new();
        let mut table = NeighborTable::new();
        for n in 1..=4u8 {
            table.poll_add_neighbor_link(id(n), Address::uhf(n), Cost(1), &clock);
        }
        let at_0 = table.acquire_cursor().unwrap();
        let at_2 = table.acquire_cursor().unwrap();
        let at_3 = table.acquire_cursor().unwrap();
        table.cursors[at_2.0] = Some(2);
        table.cursors[at_3.0] = Some(3);

        table.remove_neighbor_node(&id(3)); // index 2

        // Cursor that was at the removed index now "advances" to whatever
        // slid into that slot.
        assert_eq!(table.poll_cursor_next(&at_2).unwrap().id, id(4));
        // Cursor beyond the removed index shifts down by one.
        assert_eq!(table.cursors[at_3.0], Some(2));
        // Cursor before the removed index is untouched.
        assert_eq!(table.poll_cursor_next(&at_0).unwrap().id, id(1));
    }

    #[test]
    fn expiration_sweeps_one_stale_entry_at_a_time() {
        let clock = MockClock::new();
        let mut table = NeighborTable::new();
        table.poll_add_neighbor_link(id(1), Address::uhf(1), Cost(1), &clock);
        clock.advance(Duration::from_millis(100));
        table.poll_add_neighbor_link(id(2), Address::uhf(2), Cost(1), &clock);

        clock.advance(Duration::from_millis(50));
        assert!(table.poll_expire_one(&clock, Duration::from_millis(100)).is_pending());

        clock.advance(Duration::from_millis(60));
        assert_eq!(
            table.poll_expire_one(&clock, Duration::from_millis(100)),
            Poll::Ready(id(1))
        );
        assert!(!table.contains(&id(1)));
        assert!(table.contains(&id(2)));
    }

    #[test]
    fn table_full_pends_rather_than_erroring() {
        let clock = MockClock::new();
        let mut table = NeighborTable::new();
        for n in 0..MAX_NEIGHBOR_NODE_COUNT as u8 {
            table.poll_add_neighbor_link(id(n), Address::uhf(n), Cost(1), &clock);
        }
        let result = table.poll_add_neighbor_link(
            id(MAX_NEIGHBOR_NODE_COUNT as u8),
            Address::uhf(200),
            Cost(1),
            &clock,
        );
        assert!(result.is_pending());
    }
}
