//! Discovery-adjacent caches (`spec.md` §4.8).
//!
//! Grounded in the original's `net/discovery/cache.h` (the target -> gateway
//! route cache) and `net/discovery/constants.h`'s `FRAME_ID_CACHE_SIZE` (an
//! idempotence window so a flooded `Request` seen twice over different
//! links is only acted on once).

use heapless::Deque;
use heapless::Vec as HVec;

use crate::config::{FRAME_ID_CACHE_SIZE, MAX_ROUTE_CACHE_ENTRIES};
use crate::node::NodeId;

/// Remembers the most recently seen discovery frame ids, oldest evicted
/// first once full.
pub struct FrameIdCache {
    seen: Deque<u16, FRAME_ID_CACHE_SIZE>,
}

impl FrameIdCache {
    pub const fn new() -> Self {
        Self { seen: Deque::new() }
    }

    pub fn contains(&self, frame_id: u16) -> bool {
        self.seen.iter().any(|id| *id == frame_id)
    }

    /// Records `frame_id` as seen, returning `true` if it was new. A
    /// duplicate is still a no-op rather than being moved to the front:
    /// recency here only needs to track "seen at all", not "seen recently".
    pub fn insert(&mut self, frame_id: u16) -> bool {
        if self.contains(frame_id) {
            return false;
        }
        if self.seen.is_full() {
            self.seen.pop_front();
        }
        let _ = self.seen.push_back(frame_id);
        true
    }
}

impl Default for FrameIdCache {
    fn default() -> Self {
        Self::new()
    }
}

struct RouteEntry {
    target_id: NodeId,
    gateway_id: NodeId,
}

/// Caches the gateway a discovery previously resolved for a target, so a
/// later search for the same target can skip the flood entirely.
pub struct DiscoveryCache {
    entries: HVec<RouteEntry, MAX_ROUTE_CACHE_ENTRIES>,
}

impl DiscoveryCache {
    pub const fn new() -> Self {
        Self { entries: HVec::new() }
    }

    pub fn get(&self, target_id: &NodeId) -> Option<&NodeId> {
        self.entries
            .iter()
            .find(|e| &e.target_id == target_id)
            .map(|e| &e.gateway_id)
    }

    /// Records `target_id -> gateway_id`. A no-op if `target_id` is already
    /// cached: the first discovered route wins, matching the original
    /// (`DiscoveryCache::add`'s own early return on an existing entry)
    /// rather than letting a later, possibly worse, answer overwrite it.
    /// Silently dropped if the cache is full and `target_id` is new.
    pub fn add(&mut self, target_id: NodeId, gateway_id: NodeId) {
        if self.get(&target_id).is_some() {
            return;
        }
        let _ = self.entries.push(RouteEntry { target_id, gateway_id });
    }

    /// Drops every route that went through `gateway_id`, e.g. once that
    /// neighbor disconnects and its routes are no longer valid.
    pub fn remove_routes_through(&mut self, gateway_id: &NodeId) {
        let previous = core::mem::take(&mut self.entries);
        for entry in previous {
            if &entry.gateway_id != gateway_id {
                let _ = self.entries.push(entry);
            }
        }
    }
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::address::Address;

    fn id(b: u8) -> NodeId {
        NodeId::new(Address::uhf(b))
    }

    #[test]
    fn frame_id_cache_detects_duplicates_and_evicts_oldest() {
        let mut cache = FrameIdCache::new();
        assert!(cache.insert(1));
        assert!(!cache.insert(1));
        for n in 2..=FRAME_ID_CACHE_SIZE as u16 {
            cache.insert(n);
        }
        // now full; inserting one more evicts id 1
        cache.insert(FRAME_ID_CACHE_SIZE as u16 + 1);
        assert!(!cache.contains(1));
    }

    #[test]
    fn route_cache_is_first_write_wins() {
        let mut cache = DiscoveryCache::new();
        cache.add(id(9), id(2));
        cache.add(id(9), id(3));
        assert_eq!(cache.get(&id(9)), Some(&id(2)));
    }

    #[test]
    fn remove_routes_through_purges_matching_gateway_only() {
        let mut cache = DiscoveryCache::new();
        cache.add(id(9), id(2));
        cache.add(id(10), id(3));
        cache.remove_routes_through(&id(2));
        assert!(cache.get(&id(9)).is_none());
        assert_eq!(cache.get(&id(10)), Some(&id(3)));
    }
}
