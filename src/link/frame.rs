//! Link-layer frames and the closed protocol-number set (`spec.md` §6).

use crate::frame::FrameReader;
use crate::link::address::Address;

/// A protocol number. The low values are reserved for this crate's own
/// control protocols; application protocols start at `0x10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Protocol(pub u8);

impl Protocol {
    pub const SERIAL_CONTROL: Protocol = Protocol(1);
    pub const UHF_CONTROL: Protocol = Protocol(2);
    pub const ROUTING_NEIGHBOR: Protocol = Protocol(3);
    pub const ROUTING_REACTIVE: Protocol = Protocol(4);
    pub const APPLICATION_MIN: u8 = 0x10;

    pub const fn is_application(self) -> bool {
        self.0 >= Self::APPLICATION_MIN
    }
}

/// A received frame handed from a media driver to a socket.
pub struct LinkFrame {
    pub protocol: Protocol,
    pub remote: Address,
    pub reader: FrameReader,
}
