//! Neighbor hello/goodbye wire frames (`spec.md` §4.7).
//!
//! Grounded in the original's `net/neighbor/frame.h`: `Hello` and `HelloAck`
//! share one wire layout and are told apart only by the leading type byte,
//! the same validated-tag-then-dispatch shape the UHF response reader uses
//! for its own `*DR=`/`*CS=` lines.

use crate::io::{Readable, Writable};
use crate::link::address::{Address, AddressDeserializer, AddressSerializer};
use crate::node::{ClusterId, Cost, NodeId};
use crate::poll::Poll;
use crate::ready;
use crate::serde::de::{BinU16 as DeBinU16, BinU8 as DeBinU8, Deserialize, DeserializeResult};
use crate::serde::ser::{BinU16 as SerBinU16, BinU8 as SerBinU8, Serialize, SerializeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameType {
    Hello = 0x01,
    HelloAck = 0x02,
    Goodbye = 0x03,
}

impl FrameType {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(FrameType::Hello),
            0x02 => Some(FrameType::HelloAck),
            0x03 => Some(FrameType::Goodbye),
            _ => None,
        }
    }

    fn tag(self) -> u8 {
        self as u8
    }
}

/// Shared layout of `Hello` and `HelloAck`; `is_ack` alone distinguishes
/// them, so one struct stands in for both.
#[derive(Debug, Clone)]
pub struct HelloFrame {
    pub is_ack: bool,
    pub sender_id: NodeId,
    pub sender_cluster_id: ClusterId,
    pub node_cost: Cost,
    pub link_cost: Cost,
}

#[derive(Debug, Clone)]
pub struct GoodbyeFrame {
    pub sender_id: NodeId,
}

#[derive(Debug, Clone)]
pub enum NeighborFrame {
    Hello(HelloFrame),
    Goodbye(GoodbyeFrame),
}

struct HelloFrameSerializer {
    type_tag: SerBinU8,
    sender_id: AddressSerializer,
    cluster_id: SerBinU8,
    node_cost: SerBinU16,
    link_cost: SerBinU16,
    stage: u8,
}

impl HelloFrameSerializer {
    fn new(frame: &HelloFrame) -> Self {
        let tag = if frame.is_ack {
            FrameType::HelloAck
        } else {
            FrameType::Hello
        };
        Self {
            type_tag: SerBinU8::new(tag.tag()),
            sender_id: AddressSerializer::new(frame.sender_id.address()),
            cluster_id: SerBinU8::new(frame.sender_cluster_id.0),
            node_cost: SerBinU16::new(frame.node_cost.0),
            link_cost: SerBinU16::new(frame.link_cost.0),
            stage: 0,
        }
    }
}

impl<W: Writable> Serialize<W> for HelloFrameSerializer {
    fn poll_serialize(&mut self, w: &mut W) -> Poll<SerializeResult> {
        if self.stage == 0 {
            match ready!(self.type_tag.poll_serialize(w)) {
                SerializeResult::Ok => self.stage = 1,
                other => return Poll::Ready(other),
            }
        }
        if self.stage == 1 {
            match ready!(self.sender_id.poll_serialize(w)) {
                SerializeResult::Ok => self.stage = 2,
                other => return Poll::Ready(other),
            }
        }
        if self.stage == 2 {
            match ready!(self.cluster_id.poll_serialize(w)) {
                SerializeResult::Ok => self.stage = 3,
                other => return Poll::Ready(other),
            }
        }
        if self.stage == 3 {
            match ready!(self.node_cost.poll_serialize(w)) {
                SerializeResult::Ok => self.stage = 4,
                other => return Poll::Ready(other),
            }
        }
        self.link_cost.poll_serialize(w)
    }

    fn serialized_length(&self) -> u8 {
        1 + self.sender_id.serialized_length() + 1 + 2 + 2
    }
}

struct GoodbyeFrameSerializer {
    type_tag: SerBinU8,
    sender_id: AddressSerializer,
    stage: u8,
}

impl GoodbyeFrameSerializer {
    fn new(frame: &GoodbyeFrame) -> Self {
        Self {
            type_tag: SerBinU8::new(FrameType::Goodbye.tag()),
            sender_id: AddressSerializer::new(frame.sender_id.address()),
            stage: 0,
        }
    }
}

impl<W: Writable> Serialize<W> for GoodbyeFrameSerializer {
    fn poll_serialize(&mut self, w: &mut W) -> Poll<SerializeResult> {
        if self.stage == 0 {
            match ready!(self.type_tag.poll_serialize(w)) {
                SerializeResult::Ok => self.stage = 1,
                other => return Poll::Ready(other),
            }
        }
        self.sender_id.poll_serialize(w)
    }

    fn serialized_length(&self) -> u8 {
        1 + self.sender_id.serialized_length()
    }
}

pub enum NeighborFrameSerializer {
    Hello(HelloFrameSerializer),
    Goodbye(GoodbyeFrameSerializer),
}

impl NeighborFrameSerializer {
    pub fn new(frame: &NeighborFrame) -> Self {
        match frame {
            NeighborFrame::Hello(h) => Self::Hello(HelloFrameSerializer::new(h)),
            NeighborFrame::Goodbye(g) => Self::Goodbye(GoodbyeFrameSerializer::new(g)),
        }
    }
}

impl<W: Writable> Serialize<W> for NeighborFrameSerializer {
    fn poll_serialize(&mut self, w: &mut W) -> Poll<SerializeResult> {
        match self {
            Self::Hello(s) => s.poll_serialize(w),
            Self::Goodbye(s) => s.poll_serialize(w),
        }
    }

    fn serialized_length(&self) -> u8 {
        match self {
            Self::Hello(s) => s.serialized_length(),
            Self::Goodbye(s) => s.serialized_length(),
        }
    }
}

enum Stage {
    Type(DeBinU8),
    HelloSenderId(AddressDeserializer),
    HelloClusterId(DeBinU8),
    HelloNodeCost(DeBinU16),
    HelloLinkCost(DeBinU16),
    GoodbyeSenderId(AddressDeserializer),
    Done,
}

/// Resumable parser for one neighbor-protocol frame.
pub struct NeighborFrameDeserializer {
    stage: Stage,
    frame_type: Option<FrameType>,
    sender_id: Option<Address>,
    cluster_id: u8,
    node_cost: u16,
    link_cost: u16,
}

impl NeighborFrameDeserializer {
    pub const fn new() -> Self {
        Self {
            stage: Stage::Type(DeBinU8::new()),
            frame_type: None,
            sender_id: None,
            cluster_id: 0,
            node_cost: 0,
            link_cost: 0,
        }
    }
}

impl Default for NeighborFrameDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Readable> Deserialize<R> for NeighborFrameDeserializer {
    type Output = NeighborFrame;

    fn poll_deserialize(&mut self, r: &mut R) -> Poll<DeserializeResult> {
        loop {
            match &mut self.stage {
                Stage::Type(tag) => {
                    match ready!(tag.poll_deserialize(r)) {
                        DeserializeResult::Ok => {}
                        other => return Poll::Ready(other),
                    }
                    let Some(ft) = FrameType::from_tag(tag.result()) else {
                        return Poll::Ready(DeserializeResult::Invalid);
                    };
                    self.frame_type = Some(ft);
                    self.stage = match ft {
                        FrameType::Hello | FrameType::HelloAck => {
                            Stage::HelloSenderId(AddressDeserializer::new())
                        }
                        FrameType::Goodbye => Stage::GoodbyeSenderId(AddressDeserializer::new()),
                    };
                }
                Stage::HelloSenderId(addr) => {
                    match ready!(addr.poll_deserialize(r)) {
                        DeserializeResult::Ok => {}
                        other => return Poll::Ready(other),
                    }
                    self.sender_id = Some(addr.result());
                    self.stage = Stage::HelloClusterId(DeBinU8::new());
                }
                Stage::HelloClusterId(c) => {
                    match ready!(c.poll_deserialize(r)) {
                        DeserializeResult::Ok => {}
                        other => return Poll::Ready(other),
                    }
                    self.cluster_id = c.result();
                    self.stage = Stage::HelloNodeCost(DeBinU16::new());
                }
                Stage::HelloNodeCost(c) => {
                    match ready!(c.poll_deserialize(r)) {
                        DeserializeResult::Ok => {}
                        other => return Poll::Ready(other),
                    }
                    self.node_cost = c.result();
                    self.stage = Stage::HelloLinkCost(DeBinU16::new());
                }
                Stage::HelloLinkCost(c) => {
                    match ready!(c.poll_deserialize(r)) {
                        DeserializeResult::Ok => {}
                        other => return Poll::Ready(other),
                    }
                    self.link_cost = c.result();
                    self.stage = Stage::Done;
                    return Poll::Ready(DeserializeResult::Ok);
                }
                Stage::GoodbyeSenderId(addr) => {
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

    fn result(&self) -> NeighborFrame {
        let sender_id = NodeId::new(self.sender_id.clone().expect("validated in poll_deserialize"));
        match self.frame_type.expect("validated in poll_deserialize") {
            FrameType::Hello => NeighborFrame::Hello(HelloFrame {
                is_ack: false,
                sender_id,
                sender_cluster_id: ClusterId(self.cluster_id),
                node_cost: Cost(self.node_cost),
                link_cost: Cost(self.link_cost),
            }),
            FrameType::HelloAck => NeighborFrame::Hello(HelloFrame {
                is_ack: true,
                sender_id,
                sender_cluster_id: ClusterId(self.cluster_id),
                node_cost: Cost(self.node_cost),
                link_cost: Cost(self.link_cost),
            }),
            FrameType::Goodbye => NeighborFrame::Goodbye(GoodbyeFrame { sender_id }),
        }
    }
}
