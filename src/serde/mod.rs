//! Stateful, byte-at-a-time (de)serializers over the [`crate::io`] stream
//! capabilities.
//!
//! Grounded in `original_source`'s `nb::serde::{ser,de}`: every serializer
//! or deserializer is a small owned state machine that resumes exactly
//! where it left off on every call, and once it reports [`crate::poll::Poll::Ready`]
//! it keeps reporting the same result without touching the stream again
//! (`spec.md` §4.2 contract).

pub mod de;
pub mod ser;

pub use de::{DeserializeResult, Deserialize};
pub use ser::{Serialize, SerializeResult};
