//! Reactive discovery wire frame (`spec.md` §4.8).
//!
//! Grounded in the original's `net/routing/reactive/frame.h`: a single flat
//! layout for both directions of a discovery exchange, told apart by the
//! leading type byte. A `Request` floods outward from the node that wants a
//! route; every node that cannot yet answer it repeats the request further
//! out via [`DiscoveryFrame::repeat`], accumulating `total_cost` by the
//! relayed-over link's cost plus the relaying node's own cost and
//! overwriting `sender_id` with the relaying node's own id, matching the
//! original's `repeat_received_frame` exactly (`total_cost + link_cost +
//! self_cost`, `sender_id = self_id`) — `sender_id` always names the most
//! recent relay, not the search's originator (that's `source_id`). A `Reply`
//! is built directly by the node that can answer, addressed back at
//! `source_id`.

use crate::io::{Readable, Writable};
use crate::link::address::{Address, AddressDeserializer, AddressSerializer};
use crate::node::{Cost, NodeId};
use crate::poll::Poll;
use crate::ready;
use crate::serde::de::{BinU16 as DeBinU16, BinU8 as DeBinU8, Deserialize, DeserializeResult};
use crate::serde::ser::{BinU16 as SerBinU16, BinU8 as SerBinU8, Serialize, SerializeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryFrameKind {
    Request = 0x01,
    Reply = 0x02,
}

impl DiscoveryFrameKind {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::Request),
            0x02 => Some(Self::Reply),
            _ => None,
        }
    }

    fn tag(self) -> u8 {
        self as u8
    }
}

/// A request-for-route or an answer to one.
#[derive(Debug, Clone)]
pub struct DiscoveryFrame {
    pub kind: DiscoveryFrameKind,
    pub frame_id: u16,
    /// Cost accumulated from `source_id` to whichever node sent this frame
    /// out (for `Request`); always zero on a freshly built `Reply`.
    pub total_cost: Cost,
    /// The node that started this search.
    pub source_id: NodeId,
    /// The node being searched for.
    pub target_id: NodeId,
    /// The node that put this specific frame on the wire: the most recent
    /// relay, overwritten on every `repeat()` call. `source_id` is the one
    /// that stays fixed to the search's originator across hops.
    pub sender_id: NodeId,
}

impl DiscoveryFrame {
    /// A node starting a search for `target_id`.
    pub fn request(frame_id: u16, local_id: NodeId, local_cost: Cost, target_id: NodeId) -> Self {
        Self {
            kind: DiscoveryFrameKind::Request,
            frame_id,
            total_cost: local_cost,
            source_id: local_id.clone(),
            target_id,
            sender_id: local_id,
        }
    }

    /// Relays a frame this node isn't the target of one hop further,
    /// claiming it as the new `sender_id` and folding `additional_cost`
    /// (the cost of the link just traversed, plus this node's own cost) into
    /// the running total.
    pub fn repeat(&self, local_id: NodeId, additional_cost: Cost) -> Self {
        Self {
            kind: self.kind,
            frame_id: self.frame_id,
            total_cost: self.total_cost + additional_cost,
            source_id: self.source_id.clone(),
            target_id: self.target_id.clone(),
            sender_id: local_id,
        }
    }

    /// Builds the answer to this `Request`, from the node that can answer
    /// it. Addressed back at `source_id`.
    pub fn reply(&self, local_id: NodeId) -> Self {
        debug_assert_eq!(self.kind, DiscoveryFrameKind::Request);
        Self {
            kind: DiscoveryFrameKind::Reply,
            frame_id: self.frame_id,
            total_cost: Cost::ZERO,
            source_id: local_id.clone(),
            target_id: self.source_id.clone(),
            sender_id: local_id,
        }
    }
}

pub struct DiscoveryFrameSerializer {
    kind: SerBinU8,
    frame_id: SerBinU16,
    total_cost: SerBinU16,
    source_id: AddressSerializer,
    target_id: AddressSerializer,
    sender_id: AddressSerializer,
    stage: u8,
}

impl DiscoveryFrameSerializer {
    pub fn new(frame: &DiscoveryFrame) -> Self {
        Self {
            kind: SerBinU8::new(frame.kind.tag()),
            frame_id: SerBinU16::new(frame.frame_id),
            total_cost: SerBinU16::new(frame.total_cost.0),
            source_id: AddressSerializer::new(frame.source_id.address()),
            target_id: AddressSerializer::new(frame.target_id.address()),
            sender_id: AddressSerializer::new(frame.sender_id.address()),
            stage: 0,
        }
    }
}

impl<W: Writable> Serialize<W> for DiscoveryFrameSerializer {
    fn poll_serialize(&mut self, w: &mut W) -> Poll<SerializeResult> {
        if self.stage == 0 {
            match ready!(self.kind.poll_serialize(w)) {
                SerializeResult::Ok => self.stage = 1,
                other => return Poll::Ready(other),
            }
        }
        if self.stage == 1 {
            match ready!(self.frame_id.poll_serialize(w)) {
                SerializeResult::Ok => self.stage = 2,
                other => return Poll::Ready(other),
            }
        }
        if self.stage == 2 {
            match ready!(self.total_cost.poll_serialize(w)) {
                SerializeResult::Ok => self.stage = 3,
                other => return Poll::Ready(other),
            }
        }
        if self.stage == 3 {
            match ready!(self.source_id.poll_serialize(w)) {
                SerializeResult::Ok => self.stage = 4,
                other => return Poll::Ready(other),
            }
        }
        if self.stage == 4 {
            match ready!(self.target_id.poll_serialize(w)) {
                SerializeResult::Ok => self.stage = 5,
                other => return Poll::Ready(other),
            }
        }
        self.sender_id.poll_serialize(w)
    }

    fn serialized_length(&self) -> u8 {
        1 + 2
            + 2
            + self.source_id.serialized_length()
            + self.target_id.serialized_length()
            + self.sender_id.serialized_length()
    }
}

enum Stage {
    Kind(DeBinU8),
    FrameId(DeBinU16),
    TotalCost(DeBinU16),
    SourceId(AddressDeserializer),
    TargetId(AddressDeserializer),
    SenderId(AddressDeserializer),
    Done,
}

/// Resumable parser for one discovery-protocol frame.
pub struct DiscoveryFrameDeserializer {
    stage: Stage,
    kind: Option<DiscoveryFrameKind>,
    frame_id: u16,
    total_cost: u16,
    source_id: Option<Address>,
    target_id: Option<Address>,
    sender_id: Option<Address>,
}

impl DiscoveryFrameDeserializer {
    pub const fn new() -> Self {
        Self {
            stage: Stage::Kind(DeBinU8::new()),
            kind: None,
            frame_id: 0,
            total_cost: 0,
            source_id: None,
            target_id: None,
            sender_id: None,
        }
    }
}

impl Default for DiscoveryFrameDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Readable> Deserialize<R> for DiscoveryFrameDeserializer {
    type Output = DiscoveryFrame;

    fn poll_deserialize(&mut self, r: &mut R) -> Poll<DeserializeResult> {
        loop {
            match &mut self.stage {
                Stage::Kind(tag) => {
                    match ready!(tag.poll_deserialize(r)) {
                        DeserializeResult::Ok => {}
                        other => return Poll::Ready(other),
                    }
                    let Some(kind) = DiscoveryFrameKind::from_tag(tag.result()) else {
                        return Poll::Ready(DeserializeResult::Invalid);
                    };
                    self.kind = Some(kind);
                    self.stage = Stage::FrameId(DeBinU16::new());
                }
                Stage::FrameId(f) => {
                    match ready!(f.poll_deserialize(r)) {
                        DeserializeResult::Ok => {}
                        other => return Poll::Ready(other),
                    }
                    self.frame_id = f.result();
                    self.stage = Stage::TotalCost(DeBinU16::new());
                }
                Stage::TotalCost(c) => {
                    match ready!(c.poll_deserialize(r)) {
                        DeserializeResult::Ok => {}
                        other => return Poll::Ready(other),
                    }
                    self.total_cost = c.result();
                    self.stage = Stage::SourceId(AddressDeserializer::new());
                }
                Stage::SourceId(addr) => {
                    match ready!(addr.poll_deserialize(r)) {
                        DeserializeResult::Ok => {}
                        other => return Poll::Ready(other),
                    }
                    self.source_id = Some(addr.result());
                    self.stage = Stage::TargetId(AddressDeserializer::new());
                }
                Stage::TargetId(addr) => {
                    match ready!(addr.poll_deserialize(r)) {
                        DeserializeResult::Ok => {}
                        other => return Poll::Ready(other),
                    }
                    self.target_id = Some(addr.result());
                    self.stage = Stage::SenderId(AddressDeserializer::new());
                }
                Stage::SenderId(addr) => {
                    match ready!(addr.poll_deserialize(r)) {
                        DeserializeResult::Ok => {}
                        other => return Poll::Ready(other),
                    }
                    self.sender_id = Some(addr.result());
                    self.stage = Stage::Done;
                    return Poll::Ready(DeserializeResult::Ok);
                }
                Stage::Done => return Poll::Ready(DeserializeResult::Ok),
            }
        }
    }

    fn result(&self) -> DiscoveryFrame {
        DiscoveryFrame {
            kind: self.kind.expect("validated in poll_deserialize"),
            frame_id: self.frame_id,
            total_cost: Cost(self.total_cost),
            source_id: NodeId::new(self.source_id.clone().expect("validated in poll_deserialize")),
            target_id: NodeId::new(self.target_id.clone().expect("validated in poll_deserialize")),
            sender_id: NodeId::new(self.sender_id.clone().expect("validated in poll_deserialize")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::MockStream;

    fn id(b: u8) -> NodeId {
        NodeId::new(Address::uhf(b))
    }

    #[test]
    fn request_round_trips() {
        let frame = DiscoveryFrame::request(42, id(1), Cost(0), id(9));
        let mut w = MockStream::new();
        let mut ser = DiscoveryFrameSerializer::new(&frame);
        assert!(ser.poll_serialize(&mut w).is_ready());

        let mut r = MockStream::new();
        r.feed(&w.written);
        let mut de = DiscoveryFrameDeserializer::new();
        assert_eq!(de.poll_deserialize(&mut r), Poll::Ready(DeserializeResult::Ok));
        let parsed = de.result();
        assert_eq!(parsed.kind, DiscoveryFrameKind::Request);
        assert_eq!(parsed.frame_id, 42);
        assert_eq!(parsed.source_id, id(1));
        assert_eq!(parsed.target_id, id(9));
        assert_eq!(parsed.sender_id, id(1));
    }

    #[test]
    fn repeat_accumulates_cost_and_claims_sender() {
        let original = DiscoveryFrame::request(7, id(1), Cost(0), id(9));
        let relayed = original.repeat(id(2), Cost(3));
        assert_eq!(relayed.total_cost, Cost(3));
        assert_eq!(relayed.source_id, id(1));
        assert_eq!(relayed.sender_id, id(2));
        let relayed_again = relayed.repeat(id(3), Cost(4));
        assert_eq!(relayed_again.total_cost, Cost(7));
        assert_eq!(relayed_again.source_id, id(1));
        assert_eq!(relayed_again.sender_id, id(3));
    }

    #[test]
    fn reply_addresses_back_at_the_source_with_zero_cost() {
        let request = DiscoveryFrame::request(7, id(1), Cost(0), id(9));
        let relayed = request.repeat(id(2), Cost(5));
        let reply = relayed.reply(id(9));
        assert_eq!(reply.kind, DiscoveryFrameKind::Reply);
        assert_eq!(reply.frame_id, 7);
        assert_eq!(reply.total_cost, Cost::ZERO);
        assert_eq!(reply.source_id, id(9));
        assert_eq!(reply.target_id, id(1));
        assert_eq!(reply.sender_id, id(9));
    }

    #[test]
    fn rejects_unknown_type_tag() {
        let mut r = MockStream::new();
        r.feed(&[0xFF]);
        let mut de = DiscoveryFrameDeserializer::new();
        assert_eq!(
            de.poll_deserialize(&mut r),
            Poll::Ready(DeserializeResult::Invalid)
        );
    }
}
