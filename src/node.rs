//! Node identity and path cost, shared by the neighbor and discovery
//! services.
//!
//! Grounded in `original_source/.../net/routing/node.h`: a `NodeId` is a
//! thin wrapper over a link [`Address`](crate::link::Address) (the node is
//! identified by whichever address first introduced it), and `Cost` is a
//! 16-bit additive path metric.

use crate::link::Address;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId(Address);

impl NodeId {
    pub const fn new(address: Address) -> Self {
        Self(address)
    }

    pub fn address(&self) -> &Address {
        &self.0
    }

    pub fn into_address(self) -> Address {
        self.0
    }
}

impl From<Address> for NodeId {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

/// Opaque cluster tag carried by hello frames (`spec.md` §4.7). Not
/// otherwise interpreted by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClusterId(pub u8);

/// Non-negative additive path cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Cost(pub u16);

impl Cost {
    pub const ZERO: Cost = Cost(0);

    pub fn saturating_add(self, other: Cost) -> Cost {
        Cost(self.0.saturating_add(other.0))
    }
}

impl core::ops::Add for Cost {
    type Output = Cost;
    fn add(self, rhs: Cost) -> Cost {
        self.saturating_add(rhs)
    }
}
