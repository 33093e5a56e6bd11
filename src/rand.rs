//! Bounded-integer randomness for backoff jitter and frame-ID generation.
//!
//! Generalizes over `rand_core::RngCore`, the trait the teacher's
//! `Controller::step`/`offer_addr` already take as a generic `Rand: RngCore`
//! parameter. Neither determinism nor cryptographic quality is required.

use rand_core::RngCore;

/// Thin wrapper adding the half-open bounded draw the spec calls for.
pub struct Rand<R: RngCore> {
    inner: R,
}

impl<R: RngCore> Rand<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Draw a `u8` in `[lo, hi)`. Returns `lo` if the range is empty or
    /// inverted.
    pub fn gen_u8(&mut self, lo: u8, hi: u8) -> u8 {
        if hi <= lo {
            return lo;
        }
        let span = (hi - lo) as u32;
        let draw = self.inner.next_u32() % span;
        lo + draw as u8
    }

    pub fn gen_u16(&mut self) -> u16 {
        (self.inner.next_u32() & 0xFFFF) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};

    #[test]
    fn gen_u8_stays_in_half_open_range() {
        let mut rand = Rand::new(ChaCha8Rng::from_seed([7u8; 32]));
        for _ in 0..1000 {
            let v = rand.gen_u8(50, 100);
            assert!((50..100).contains(&v));
        }
    }

    #[test]
    fn gen_u8_empty_range_returns_lo() {
        let mut rand = Rand::new(ChaCha8Rng::from_seed([1u8; 32]));
        assert_eq!(rand.gen_u8(10, 10), 10);
    }
}
