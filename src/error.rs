//! Crate-wide error taxonomy (`spec.md` §7).
//!
//! Resource exhaustion is never an error here — it is always modeled as
//! [`crate::poll::Poll::Pending`] (§7 propagation policy). These types cover
//! the genuine fallible boundaries: malformed wire data, transport errors,
//! and socket-level send failures surfaced to the application.

use core::fmt;

/// Deserialization outcome, mirroring `original_source`'s
/// `nb::de::DeserializeResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeserializeError {
    /// The stream will never yield enough bytes (closed/exhausted).
    NotEnoughLength,
    /// The bytes read do not form a valid value (bad hex digit, unknown
    /// enum tag, missing CRLF, ...).
    Invalid,
}

/// Wraps a transport-specific I/O error alongside this crate's own
/// conditions, matching the shape of the teacher's `erdnuss_comms::Error<E>`.
#[derive(Debug)]
pub enum Error<E> {
    Transport(E),
    Deserialize(DeserializeError),
}

impl<E> From<DeserializeError> for Error<E> {
    fn from(value: DeserializeError) -> Self {
        Self::Deserialize(value)
    }
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "transport error: {e:?}"),
            Error::Deserialize(e) => write!(f, "deserialize error: {e:?}"),
        }
    }
}

/// Why a socket could not accept a frame to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// No attached medium can carry this address type.
    SupportedMediaNotFound,
    /// The address type is supported, but no live neighbor/route reaches
    /// this specific destination right now.
    UnreachableNode,
}

/// Why carrier-sense-multiple-access gave up sending a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsFailure;

/// Outcome of a reactive discovery: a gateway node or nothing.
pub type DiscoveryOutcome = Option<crate::node::NodeId>;
