//! Link layer: addresses, frames, the broker, and application sockets
//! (`spec.md` §4.4, C4/C5).

pub mod address;
pub mod broker;
pub mod frame;
pub mod socket;

pub use address::{Address, AddressKind};
pub use broker::{Broker, SocketHandle, TxItem};
pub use frame::{LinkFrame, Protocol};
pub use socket::{BroadcastCursor, NeighborAddressSource, Socket};
