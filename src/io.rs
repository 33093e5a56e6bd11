//! Non-blocking byte-stream capabilities consumed by media drivers.
//!
//! Grounded in the teacher's `FrameSerial` trait (`send_frame`/`recv`), but
//! split into the finer read/write primitives `spec.md` §6 specifies, since
//! the serial and UHF drivers here are byte-at-a-time state machines rather
//! than the teacher's whole-frame `async fn`.

use crate::poll::Poll;
use crate::ready;

/// Outcome of asking whether `n` more bytes are readable/writable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthResult {
    Ok,
    NotEnoughLength,
}

/// A byte-oriented, non-blocking readable stream.
pub trait Readable {
    /// Checks whether at least `n` bytes are available without consuming
    /// them. `Pending` means "maybe later"; `Ready(NotEnoughLength)` means
    /// the stream is closed/exhausted and will never have `n` bytes.
    fn poll_readable(&mut self, n: usize) -> Poll<LengthResult>;

    /// Reads one byte. Only valid to call after `poll_readable` returned
    /// `Ready(Ok)` for at least one remaining byte.
    fn read_unchecked(&mut self) -> u8;

    fn read(&mut self, out: &mut [u8]) -> Poll<LengthResult> {
        match ready!(self.poll_readable(out.len())) {
            LengthResult::Ok => {
                for b in out.iter_mut() {
                    *b = self.read_unchecked();
                }
                Poll::Ready(LengthResult::Ok)
            }
            LengthResult::NotEnoughLength => Poll::Ready(LengthResult::NotEnoughLength),
        }
    }
}

/// A byte-oriented, non-blocking writable stream.
pub trait Writable {
    fn poll_writable(&mut self, n: usize) -> Poll<LengthResult>;

    fn write_unchecked(&mut self, b: u8);

    fn write(&mut self, data: &[u8]) -> Poll<LengthResult> {
        match ready!(self.poll_writable(data.len())) {
            LengthResult::Ok => {
                for &b in data {
                    self.write_unchecked(b);
                }
                Poll::Ready(LengthResult::Ok)
            }
            LengthResult::NotEnoughLength => Poll::Ready(LengthResult::NotEnoughLength),
        }
    }
}

/// A combined readable+writable byte stream, e.g. a UART.
pub trait ReadableWritable: Readable + Writable {}
impl<T: Readable + Writable> ReadableWritable for T {}

#[cfg(any(test, feature = "std"))]
pub mod mock {
    //! An in-memory byte stream for tests: bytes pushed via `feed` become
    //! readable; bytes written are captured in `written`.
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub struct MockStream {
        pub rx: VecDeque<u8>,
        pub written: Vec<u8>,
        pub write_cap: Option<usize>,
    }

    impl MockStream {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn feed(&mut self, bytes: &[u8]) {
            self.rx.extend(bytes.iter().copied());
        }
    }

    impl Readable for MockStream {
        fn poll_readable(&mut self, n: usize) -> Poll<LengthResult> {
            if self.rx.len() >= n {
                Poll::Ready(LengthResult::Ok)
            } else {
                Poll::Pending
            }
        }

        fn read_unchecked(&mut self) -> u8 {
            self.rx.pop_front().expect("read_unchecked with no data")
        }
    }

    impl Writable for MockStream {
        fn poll_writable(&mut self, n: usize) -> Poll<LengthResult> {
            if let Some(cap) = self.write_cap {
                if self.written.len() + n > cap {
                    return Poll::Ready(LengthResult::NotEnoughLength);
                }
            }
            Poll::Ready(LengthResult::Ok)
        }

        fn write_unchecked(&mut self, b: u8) {
            self.written.push(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockStream;
    use super::*;

    #[test]
    fn read_waits_for_full_length() {
        let mut s = MockStream::new();
        let mut out = [0u8; 3];
        assert!(s.read(&mut out).is_pending());
        s.feed(&[1, 2, 3]);
        assert_eq!(s.read(&mut out), Poll::Ready(LengthResult::Ok));
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn write_records_bytes() {
        let mut s = MockStream::new();
        assert_eq!(s.write(&[9, 8, 7]), Poll::Ready(LengthResult::Ok));
        assert_eq!(s.written, vec![9, 8, 7]);
    }
}
