//! Link-layer addresses.
//!
//! Grounded in `original_source`'s `media/address/{single_byte,modem_id,serial}.h`:
//! every medium defines a small fixed-width address, here unified behind one
//! tagged `Address` carrying up to 8 bytes (`spec.md` §3).

use heapless::Vec as HVec;

use crate::config::UHF_BROADCAST_ID;

/// Which medium an address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    Serial,
    Uhf,
}

/// A tagged, bounded-length address (`spec.md` §3: `{type, bytes <= 8}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    kind: AddressKind,
    bytes: HVec<u8, 8>,
}

impl Address {
    pub fn new(kind: AddressKind, bytes: &[u8]) -> Self {
        assert!(bytes.len() <= 8);
        let mut v = HVec::new();
        v.extend_from_slice(bytes).ok();
        Self { kind, bytes: v }
    }

    pub fn serial(id: u8) -> Self {
        Self::new(AddressKind::Serial, &[id])
    }

    pub fn uhf(id: u8) -> Self {
        Self::new(AddressKind::Uhf, &[id])
    }

    /// The reserved broadcast address for `kind`, if that medium supports
    /// broadcast. Only UHF does (`spec.md` §3, §6).
    pub fn broadcast(kind: AddressKind) -> Option<Self> {
        match kind {
            AddressKind::Uhf => Some(Self::uhf(UHF_BROADCAST_ID)),
            AddressKind::Serial => None,
        }
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_broadcast(&self) -> bool {
        Self::broadcast(self.kind).is_some_and(|b| b.bytes == self.bytes)
    }

    pub fn as_serial_id(&self) -> Option<u8> {
        (self.kind == AddressKind::Serial).then(|| self.bytes[0])
    }

    pub fn as_uhf_id(&self) -> Option<u8> {
        (self.kind == AddressKind::Uhf).then(|| self.bytes[0])
    }
}

fn kind_tag(kind: AddressKind) -> u8 {
    match kind {
        AddressKind::Serial => 1,
        AddressKind::Uhf => 2,
    }
}

fn kind_from_tag(tag: u8) -> Option<AddressKind> {
    match tag {
        1 => Some(AddressKind::Serial),
        2 => Some(AddressKind::Uhf),
        _ => None,
    }
}

/// Wire encoding for an [`Address`] inside a neighbor or discovery frame: a
/// kind tag followed by the address's own byte. Every medium this crate
/// drives uses a single-byte id, so this does not need a length field.
pub struct AddressSerializer {
    kind: crate::serde::ser::BinU8,
    byte: crate::serde::ser::BinU8,
    stage: u8,
}

impl AddressSerializer {
    pub fn new(address: &Address) -> Self {
        Self {
            kind: crate::serde::ser::BinU8::new(kind_tag(address.kind)),
            byte: crate::serde::ser::BinU8::new(address.bytes[0]),
            stage: 0,
        }
    }
}

impl<W: crate::io::Writable> crate::serde::ser::Serialize<W> for AddressSerializer {
    fn poll_serialize(&mut self, w: &mut W) -> crate::poll::Poll<crate::serde::ser::SerializeResult> {
        use crate::serde::ser::{Serialize, SerializeResult};
        if self.stage == 0 {
            match crate::ready!(self.kind.poll_serialize(w)) {
                SerializeResult::Ok => self.stage = 1,
                other => return crate::poll::Poll::Ready(other),
            }
        }
        self.byte.poll_serialize(w)
    }

    fn serialized_length(&self) -> u8 {
        2
    }
}

pub struct AddressDeserializer {
    kind: crate::serde::de::BinU8,
    byte: crate::serde::de::BinU8,
    stage: u8,
}

impl AddressDeserializer {
    pub const fn new() -> Self {
        Self {
            kind: crate::serde::de::BinU8::new(),
            byte: crate::serde::de::BinU8::new(),
            stage: 0,
        }
    }
}

impl Default for AddressDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: crate::io::Readable> crate::serde::de::Deserialize<R> for AddressDeserializer {
    type Output = Address;

    fn poll_deserialize(&mut self, r: &mut R) -> crate::poll::Poll<crate::serde::de::DeserializeResult> {
        use crate::serde::de::{Deserialize, DeserializeResult};
        if self.stage == 0 {
            match crate::ready!(self.kind.poll_deserialize(r)) {
                DeserializeResult::Ok => {}
                other => return crate::poll::Poll::Ready(other),
            }
            if kind_from_tag(self.kind.result()).is_none() {
                return crate::poll::Poll::Ready(DeserializeResult::Invalid);
            }
            self.stage = 1;
        }
        self.byte.poll_deserialize(r)
    }

    fn result(&self) -> Address {
        use crate::serde::de::Deserialize;
        let kind = kind_from_tag(self.kind.result()).expect("validated in poll_deserialize");
        Address::new(kind, &[self.byte.result()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_wire_round_trips_kind_and_byte() {
        use crate::io::mock::MockStream;
        use crate::serde::de::Deserialize;
        use crate::serde::ser::Serialize;

        let mut w = MockStream::new();
        let mut ser = AddressSerializer::new(&Address::uhf(0xC4));
        assert!(ser.poll_serialize(&mut w).is_ready());

        let mut r = MockStream::new();
        r.feed(&w.written);
        let mut de = AddressDeserializer::new();
        assert_eq!(
            de.poll_deserialize(&mut r),
            crate::poll::Poll::Ready(crate::serde::de::DeserializeResult::Ok)
        );
        assert_eq!(de.result(), Address::uhf(0xC4));
    }

    #[test]
    fn rejects_unknown_kind_tag() {
        use crate::io::mock::MockStream;
        use crate::serde::de::Deserialize;

        let mut r = MockStream::new();
        r.feed(&[0xFF, 0x01]);
        let mut de = AddressDeserializer::new();
        assert_eq!(
            de.poll_deserialize(&mut r),
            crate::poll::Poll::Ready(crate::serde::de::DeserializeResult::Invalid)
        );
    }

    #[test]
    fn uhf_broadcast_matches_reserved_id() {
        let b = Address::broadcast(AddressKind::Uhf).unwrap();
        assert!(b.is_broadcast());
        assert_eq!(b.as_uhf_id(), Some(UHF_BROADCAST_ID));
    }

    #[test]
    fn serial_has_no_broadcast() {
        assert!(Address::broadcast(AddressKind::Serial).is_none());
        assert!(!Address::serial(0x0A).is_broadcast());
    }
}
