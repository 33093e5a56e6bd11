//! Deserializers: stateful readers that resume across polls.

use crate::io::{LengthResult, Readable};
use crate::poll::Poll;
use crate::ready;
use heapless::Vec as HVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeserializeResult {
    Ok,
    NotEnoughLength,
    Invalid,
}

/// A resumable deserializer over a [`Readable`] stream.
///
/// `poll_deserialize` drives the state machine forward; once it reports
/// [`Poll::Ready`], [`Deserialize::result`] yields the parsed value without
/// touching the stream again.
pub trait Deserialize<R: Readable> {
    type Output;

    fn poll_deserialize(&mut self, r: &mut R) -> Poll<DeserializeResult>;
    fn result(&self) -> Self::Output;
}

fn is_valid_hex_char(c: u8) -> bool {
    c.is_ascii_digit() || (b'A'..=b'F').contains(&c) || (b'a'..=b'f').contains(&c)
}

fn from_hex_char(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'A'..=b'F' => c - b'A' + 10,
        b'a'..=b'f' => c - b'a' + 10,
        _ => unreachable!("validated by is_valid_hex_char"),
    }
}

/// Fixed-width little-endian integer.
macro_rules! impl_bin {
    ($name:ident, $ty:ty, $len:expr) => {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name {
            value: $ty,
            done: bool,
        }

        impl $name {
            pub const fn new() -> Self {
                Self {
                    value: 0,
                    done: false,
                }
            }
        }

        impl<R: Readable> Deserialize<R> for $name {
            type Output = $ty;

            fn poll_deserialize(&mut self, r: &mut R) -> Poll<DeserializeResult> {
                if self.done {
                    return Poll::Ready(DeserializeResult::Ok);
                }
                if ready!(r.poll_readable($len)) == LengthResult::NotEnoughLength {
                    return Poll::Ready(DeserializeResult::NotEnoughLength);
                }
                let mut bytes = [0u8; $len];
                for b in bytes.iter_mut() {
                    *b = r.read_unchecked();
                }
                self.value = <$ty>::from_le_bytes(bytes);
                self.done = true;
                Poll::Ready(DeserializeResult::Ok)
            }

            fn result(&self) -> $ty {
                self.value
            }
        }
    };
}

impl_bin!(BinU8, u8, 1);
impl_bin!(BinU16, u16, 2);
impl_bin!(BinU32, u32, 4);

/// A single byte, any nonzero value is `true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bool {
    inner: BinU8,
}

impl Bool {
    pub const fn new() -> Self {
        Self {
            inner: BinU8::new(),
        }
    }
}

impl<R: Readable> Deserialize<R> for Bool {
    type Output = bool;

    fn poll_deserialize(&mut self, r: &mut R) -> Poll<DeserializeResult> {
        self.inner.poll_deserialize(r)
    }

    fn result(&self) -> bool {
        self.inner.result() != 0
    }
}

/// Uppercase or lowercase ASCII hex, exactly `2 * size_of::<T>()` characters.
macro_rules! impl_hex {
    ($name:ident, $ty:ty, $len:expr) => {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name {
            value: $ty,
            read: u8,
            invalid: bool,
        }

        impl $name {
            pub const fn new() -> Self {
                Self {
                    value: 0,
                    read: 0,
                    invalid: false,
                }
            }
        }

        impl<R: Readable> Deserialize<R> for $name {
            type Output = $ty;

            fn poll_deserialize(&mut self, r: &mut R) -> Poll<DeserializeResult> {
                while self.read < $len {
                    if self.invalid {
                        return Poll::Ready(DeserializeResult::Invalid);
                    }
                    if ready!(r.poll_readable(1)) == LengthResult::NotEnoughLength {
                        return Poll::Ready(DeserializeResult::NotEnoughLength);
                    }
                    let c = r.read_unchecked();
                    if !is_valid_hex_char(c) {
                        self.invalid = true;
                        return Poll::Ready(DeserializeResult::Invalid);
                    }
                    self.value = (self.value << 4) | (from_hex_char(c) as $ty);
                    self.read += 1;
                }
                Poll::Ready(DeserializeResult::Ok)
            }

            fn result(&self) -> $ty {
                self.value
            }
        }
    };
}

impl_hex!(HexU8, u8, 2);
impl_hex!(HexU16, u16, 4);
impl_hex!(HexU32, u32, 8);

/// Decimal ASCII digits, up to `max_digits`, terminated by the first
/// non-digit byte or by reaching the cap.
#[derive(Debug, Clone, Copy)]
pub struct DecU32 {
    value: u32,
    digits: u8,
    max_digits: u8,
    done: bool,
}

impl DecU32 {
    pub const fn new(max_digits: u8) -> Self {
        Self {
            value: 0,
            digits: 0,
            max_digits,
            done: false,
        }
    }
}

impl<R: Readable> Deserialize<R> for DecU32 {
    type Output = u32;

    fn poll_deserialize(&mut self, r: &mut R) -> Poll<DeserializeResult> {
        while !self.done {
            if ready!(r.poll_readable(1)) == LengthResult::NotEnoughLength {
                return Poll::Ready(DeserializeResult::NotEnoughLength);
            }
            let c = r.read_unchecked();
            if !c.is_ascii_digit() {
                if self.digits == 0 {
                    return Poll::Ready(DeserializeResult::Invalid);
                }
                self.done = true;
                break;
            }
            self.value = self.value * 10 + (c - b'0') as u32;
            self.digits += 1;
            if self.digits == self.max_digits {
                self.done = true;
            }
        }
        Poll::Ready(DeserializeResult::Ok)
    }

    fn result(&self) -> u32 {
        self.value
    }
}

/// Presence byte followed by the payload deserializer, if present.
pub struct Optional<D> {
    has_value: Bool,
    value: D,
    stage: u8,
}

impl<D: Default> Optional<D> {
    pub fn new() -> Self {
        Self {
            has_value: Bool::new(),
            value: D::default(),
            stage: 0,
        }
    }
}

impl<D: Default> Default for Optional<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Readable, D: Deserialize<R>> Deserialize<R> for Optional<D> {
    type Output = Option<D::Output>;

    fn poll_deserialize(&mut self, r: &mut R) -> Poll<DeserializeResult> {
        if self.stage == 0 {
            match ready!(self.has_value.poll_deserialize(r)) {
                DeserializeResult::Ok => {}
                other => return Poll::Ready(other),
            }
            if !self.has_value.result() {
                self.stage = 2;
                return Poll::Ready(DeserializeResult::Ok);
            }
            self.stage = 1;
        }
        if self.stage == 1 {
            let result = ready!(self.value.poll_deserialize(r));
            if result == DeserializeResult::Ok {
                self.stage = 2;
            }
            return Poll::Ready(result);
        }
        Poll::Ready(DeserializeResult::Ok)
    }

    fn result(&self) -> Option<D::Output> {
        if self.has_value.result() {
            Some(self.value.result())
        } else {
            None
        }
    }
}

/// Length-prefixed raw bytes, at most `N` and at most 255 elements
/// (`spec.md` §4.2, grounded in `nb::serde::de::Vec<Deserializable,N>`).
pub struct Bytes<const N: usize> {
    length: BinU8,
    data: HVec<u8, N>,
    have_length: bool,
}

impl<const N: usize> Bytes<N> {
    pub const fn new() -> Self {
        Self {
            length: BinU8::new(),
            data: HVec::new(),
            have_length: false,
        }
    }
}

impl<const N: usize> Default for Bytes<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Readable, const N: usize> Deserialize<R> for Bytes<N> {
    type Output = HVec<u8, N>;

    fn poll_deserialize(&mut self, r: &mut R) -> Poll<DeserializeResult> {
        if !self.have_length {
            match ready!(self.length.poll_deserialize(r)) {
                DeserializeResult::Ok => {}
                other => return Poll::Ready(other),
            }
            if self.length.result() as usize > N {
                return Poll::Ready(DeserializeResult::Invalid);
            }
            self.have_length = true;
        }
        let target = self.length.result() as usize;
        while self.data.len() < target {
            if ready!(r.poll_readable(1)) == LengthResult::NotEnoughLength {
                return Poll::Ready(DeserializeResult::NotEnoughLength);
            }
            let b = r.read_unchecked();
            self.data.push(b).ok();
        }
        Poll::Ready(DeserializeResult::Ok)
    }

    fn result(&self) -> HVec<u8, N> {
        self.data.clone()
    }
}

/// A fixed-count array whose element count is learned after construction
/// (e.g. from a header field), grounded in
/// `nb::serde::de::Array<Deserializable,MAX_LENGTH>`'s `set_length`.
pub struct FixedBytes<const N: usize> {
    data: HVec<u8, N>,
    length: Option<usize>,
}

impl<const N: usize> FixedBytes<N> {
    pub const fn new() -> Self {
        Self {
            data: HVec::new(),
            length: None,
        }
    }

    /// Must be called exactly once, before the first `poll_deserialize`.
    pub fn set_length(&mut self, length: usize) {
        debug_assert!(length <= N);
        self.length = Some(length);
    }
}

impl<const N: usize> Default for FixedBytes<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Readable, const N: usize> Deserialize<R> for FixedBytes<N> {
    type Output = HVec<u8, N>;

    fn poll_deserialize(&mut self, r: &mut R) -> Poll<DeserializeResult> {
        let target = self.length.expect("set_length must be called first");
        while self.data.len() < target {
            if ready!(r.poll_readable(1)) == LengthResult::NotEnoughLength {
                return Poll::Ready(DeserializeResult::NotEnoughLength);
            }
            let b = r.read_unchecked();
            self.data.push(b).ok();
        }
        Poll::Ready(DeserializeResult::Ok)
    }

    fn result(&self) -> HVec<u8, N> {
        self.data.clone()
    }
}

/// Discards exactly `N` bytes without retaining them (`spec.md` §4.2).
#[derive(Debug, Clone, Copy, Default)]
pub struct Skip<const N: usize> {
    skipped: usize,
}

impl<const N: usize> Skip<N> {
    pub const fn new() -> Self {
        Self { skipped: 0 }
    }
}

impl<R: Readable, const N: usize> Deserialize<R> for Skip<N> {
    type Output = ();

    fn poll_deserialize(&mut self, r: &mut R) -> Poll<DeserializeResult> {
        while self.skipped < N {
            if ready!(r.poll_readable(1)) == LengthResult::NotEnoughLength {
                return Poll::Ready(DeserializeResult::NotEnoughLength);
            }
            r.read_unchecked();
            self.skipped += 1;
        }
        Poll::Ready(DeserializeResult::Ok)
    }

    fn result(&self) {}
}

/// A single line up to `\r\n`, at most `N` bytes of payload (excluding the
/// terminator). `Invalid` if `N` bytes are consumed without finding `\r\n`.
///
/// Grounded in the usage pattern of `AsyncMaxLengthSingleLineBytesDeserializer`
/// (its own definition was not present in the retrieved source, so behavior
/// is inferred from call sites in `media/uhf/response.h`).
pub struct Line<const N: usize> {
    data: HVec<u8, N>,
    saw_cr: bool,
    done: bool,
}

impl<const N: usize> Line<N> {
    pub const fn new() -> Self {
        Self {
            data: HVec::new(),
            saw_cr: false,
            done: false,
        }
    }
}

impl<const N: usize> Default for Line<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Readable, const N: usize> Deserialize<R> for Line<N> {
    type Output = HVec<u8, N>;

    fn poll_deserialize(&mut self, r: &mut R) -> Poll<DeserializeResult> {
        while !self.done {
            if ready!(r.poll_readable(1)) == LengthResult::NotEnoughLength {
                return Poll::Ready(DeserializeResult::NotEnoughLength);
            }
            let c = r.read_unchecked();
            if self.saw_cr {
                self.saw_cr = false;
                if c == b'\n' {
                    self.done = true;
                    continue;
                }
                // Lone '\r': treat as payload and reconsider this byte.
                if self.data.push(b'\r').is_err() {
                    return Poll::Ready(DeserializeResult::Invalid);
                }
            }
            if c == b'\r' {
                self.saw_cr = true;
                continue;
            }
            if self.data.push(c).is_err() {
                return Poll::Ready(DeserializeResult::Invalid);
            }
        }
        Poll::Ready(DeserializeResult::Ok)
    }

    fn result(&self) -> HVec<u8, N> {
        self.data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::MockStream;

    #[test]
    fn hex_u32_parses_mixed_case() {
        let mut r = MockStream::new();
        r.feed(b"1a2B3c4D");
        let mut d = HexU32::new();
        assert_eq!(d.poll_deserialize(&mut r), Poll::Ready(DeserializeResult::Ok));
        assert_eq!(d.result(), 0x1A2B3C4D);
    }

    #[test]
    fn hex_rejects_non_hex_char() {
        let mut r = MockStream::new();
        r.feed(b"1G");
        let mut d = HexU8::new();
        assert_eq!(
            d.poll_deserialize(&mut r),
            Poll::Ready(DeserializeResult::Invalid)
        );
    }

    #[test]
    fn ready_keeps_reporting_ready_without_reconsuming() {
        let mut r = MockStream::new();
        r.feed(&[9]);
        let mut d = BinU8::new();
        assert!(d.poll_deserialize(&mut r).is_ready());
        assert!(d.poll_deserialize(&mut r).is_ready());
        assert_eq!(d.result(), 9);
        assert!(r.rx.is_empty());
    }

    #[test]
    fn pending_until_enough_bytes_available() {
        let mut r = MockStream::new();
        let mut d = BinU16::new();
        assert!(d.poll_deserialize(&mut r).is_pending());
        r.feed(&[1, 0]);
        assert_eq!(d.poll_deserialize(&mut r), Poll::Ready(DeserializeResult::Ok));
        assert_eq!(d.result(), 1);
    }

    #[test]
    fn line_splits_on_crlf() {
        let mut r = MockStream::new();
        r.feed(b"hello\r\nworld");
        let mut d: Line<16> = Line::new();
        assert_eq!(d.poll_deserialize(&mut r), Poll::Ready(DeserializeResult::Ok));
        assert_eq!(&d.result()[..], b"hello");
    }

    #[test]
    fn optional_false_yields_none() {
        let mut r = MockStream::new();
        r.feed(&[0]);
        let mut d: Optional<BinU8> = Optional::new();
        assert_eq!(d.poll_deserialize(&mut r), Poll::Ready(DeserializeResult::Ok));
        assert_eq!(d.result(), None);
    }

    #[test]
    fn fixed_bytes_uses_externally_set_length() {
        let mut r = MockStream::new();
        r.feed(&[1, 2, 3]);
        let mut d: FixedBytes<8> = FixedBytes::new();
        d.set_length(3);
        assert_eq!(d.poll_deserialize(&mut r), Poll::Ready(DeserializeResult::Ok));
        assert_eq!(&d.result()[..], &[1, 2, 3]);
    }
}
