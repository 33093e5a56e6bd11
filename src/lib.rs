#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![allow(async_fn_in_trait)]

//! Link-layer and reactive routing core for a small embedded mesh network.
//!
//! C1-C10 from the design map to crate modules one to one: [`poll`] (C1),
//! [`serde`]/[`io`] (C2), [`frame`] (C3), [`link::address`] (C4),
//! [`link::broker`]/[`link::socket`] (C5), [`media::serial`] (C6),
//! [`media::uhf`] (C7), [`neighbor`] (C8), [`discovery`] (C9), and
//! [`time`]/[`rand`] (C10).

pub mod config;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod io;
pub mod link;
pub mod lock;
pub mod log;
pub mod media;
pub mod neighbor;
pub mod node;
pub mod poll;
pub mod rand;
pub mod serde;
pub mod time;

pub(crate) use log::{mesh_debug, mesh_error, mesh_info, mesh_trace, mesh_warn};

pub use discovery::DiscoveryService;
pub use error::Error;
pub use frame::{FramePool, FramePoolStorage};
pub use link::{Address, AddressKind, Broker, Protocol, Socket};
pub use neighbor::NeighborService;
pub use node::{ClusterId, Cost, NodeId};
pub use poll::Poll;
