//! Crate-wide tunables.
//!
//! Collected here so a deployment can see every fixed-capacity / timeout
//! knob in one place, rather than scattered through each module as the
//! teacher crate does with its per-module `pub const`.

/// Payload length boundary between the short and MTU-sized buffer pools.
pub const SHORT_LEN: usize = 16;
/// Maximum link-layer payload; the large pool's arena size.
pub const MTU: usize = 254;
/// Arenas held by the short-frame pool.
pub const SHORT_POOL_COUNT: usize = 8;
/// Arenas held by the MTU-sized pool.
pub const LARGE_POOL_COUNT: usize = 4;

/// Maximum neighbor table entries.
pub const MAX_NEIGHBOR_NODE_COUNT: usize = 10;
/// Maximum addresses tracked per neighbor.
pub const MAX_MEDIA_PER_NODE: usize = 4;
/// Outstanding cursors into the neighbor table.
pub const MAX_NEIGHBOR_LIST_CURSOR_COUNT: usize = 4;
/// Neighbor liveness timeout; entries are swept once this elapses with no
/// refreshing hello/helloack.
pub const NEIGHBOR_EXPIRATION_TIMEOUT_MS: u64 = 15_000;
/// Keep-alive hello cadence per neighbor.
pub const SEND_HELLO_INTERVAL_MS: u64 = 5_000;
/// Cadence of the expiration sweep.
pub const CHECK_NEIGHBOR_EXPIRATION_INTERVAL_MS: u64 = 1_000;
/// Outstanding update/removal notifications queued for the rest of the
/// stack to drain via `NeighborService::poll_next_event`.
pub const NEIGHBOR_EVENT_QUEUE_DEPTH: usize = 8;
/// Per-hop cost this node advertises for a freshly established link. No
/// medium here reports a signal-quality metric, so every link is costed
/// uniformly.
pub const DEFAULT_LINK_COST: u16 = 1;
/// Whether the periodic hello worker also broadcasts on every
/// broadcast-capable address type, for discovering neighbors this node
/// doesn't know about yet. Per-neighbor unicast keep-alive hellos (driven
/// by each neighbor's own `next_hello_deadline`) always run regardless of
/// this flag; only the discovery broadcast is gated.
pub const ENABLE_AUTO_NEIGHBOR_DISCOVERY: bool = true;

/// Concurrent in-flight reactive discoveries.
pub const MAX_CONCURRENT_DISCOVERIES: usize = 4;
/// Recently-seen discovery frame IDs retained to suppress re-processing.
pub const FRAME_ID_CACHE_SIZE: usize = 8;
/// Target -> gateway mappings cached from completed/observed discoveries.
pub const MAX_ROUTE_CACHE_ENTRIES: usize = 8;
/// Debounce period of the in-flight discovery aggregation timer.
pub const DISCOVER_INTERVAL_MS: u64 = 25;
/// Discovery entry timeout while no reply has arrived yet.
pub const DISCOVERY_FIRST_RESPONSE_TIMEOUT_MS: u64 = 10_000;
/// Discovery entry timeout once at least one reply has arrived, so a
/// cheaper later reply still has a chance to win.
pub const DISCOVERY_BETTER_RESPONSE_TIMEOUT_MS: u64 = 1_000;

/// UHF carrier-sense backoff range/offset and retry bound.
pub const UHF_CS_BACKOFF_RANGE_MS: u8 = 100;
pub const UHF_CS_BACKOFF_OFFSET_MS: u8 = 50;
pub const UHF_CS_MAX_RETRY_COUNT: u8 = 15;
/// Outer send-with-CSMA retry bound after an `IR` interference report.
pub const UHF_SEND_MAX_RETRY_COUNT: u8 = 10;
/// Window to wait for an optional `IR` response after `@DT`.
pub const UHF_IR_WAIT_MS: u64 = 20;
/// Per-task timeout enforced by the UHF driver's main task slot.
pub const UHF_TASK_TIMEOUT_MS: u64 = 5_000;

/// Broadcast address reserved on the UHF medium.
pub const UHF_BROADCAST_ID: u8 = 0x00;
/// Upper bound on a non-`DR` response body (`SN` is the longest at 9 bytes).
pub const UHF_GENERIC_RESPONSE_BODY_LEN: usize = 16;

/// Sockets the broker can have registered at once (application + neighbor +
/// discovery + control protocols).
pub const MAX_SOCKETS: usize = 8;
/// Outstanding frames queued for a media driver to drain.
pub const TX_QUEUE_DEPTH: usize = 8;
/// Outstanding received frames queued per registered socket.
pub const RX_QUEUE_DEPTH: usize = 4;
/// Distinct media (address kinds) a broker can have attached.
pub const MAX_ATTACHED_MEDIA: usize = 4;
