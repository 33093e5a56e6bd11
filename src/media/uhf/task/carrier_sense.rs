//! Carrier-sense-multiple-access gate before a UHF send (`spec.md` §4.6).

use rand_core::RngCore;

use crate::config::{UHF_CS_BACKOFF_OFFSET_MS, UHF_CS_BACKOFF_RANGE_MS, UHF_CS_MAX_RETRY_COUNT};
use crate::error::CsFailure;
use crate::io::Writable;
use crate::media::uhf::response::{CarrierState, Response};
use crate::poll::Poll;
use crate::rand::Rand;
use crate::serde::ser::{Serialize, StaticSpan};
use crate::time::{Clock, Delay, Duration};

use super::ResponseVerdict;

const CS_COMMAND: [u8; 5] = *b"@CS\r\n";

enum Stage {
    Backoff(Delay),
    Sending(StaticSpan<5>),
    AwaitingResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierSenseOutcome {
    Clear,
    Failed(CsFailure),
}

/// Sends `@CS\r\n` and waits for `EN`/`DN`, retrying on `DN` (or a
/// malformed response) with random backoff up to
/// [`UHF_CS_MAX_RETRY_COUNT`] attempts. An unconditional zero-offset jitter
/// precedes the very first attempt, to break synchronized rebroadcast
/// storms across nodes that all became sendable at once.
pub struct CarrierSenseTask {
    stage: Stage,
    attempts: u8,
    resolved: Option<CarrierSenseOutcome>,
}

impl CarrierSenseTask {
    pub fn new<R: RngCore>(clock: &impl Clock, rand: &mut Rand<R>) -> Self {
        let jitter = rand.gen_u8(0, UHF_CS_BACKOFF_RANGE_MS);
        Self {
            stage: Stage::Backoff(Delay::new(clock, Duration::from_millis(jitter as u64))),
            attempts: 0,
            resolved: None,
        }
    }

    pub fn execute<W: Writable>(
        &mut self,
        stream: &mut W,
        clock: &impl Clock,
    ) -> Poll<CarrierSenseOutcome> {
        if let Some(outcome) = self.resolved.take() {
            return Poll::Ready(outcome);
        }
        loop {
            match &mut self.stage {
                Stage::Backoff(delay) => {
                    if delay.poll(clock).is_pending() {
                        return Poll::Pending;
                    }
                    self.stage = Stage::Sending(StaticSpan::new(CS_COMMAND));
                }
                Stage::Sending(span) => match span.poll_serialize(stream) {
                    Poll::Ready(_) => self.stage = Stage::AwaitingResponse,
                    Poll::Pending => return Poll::Pending,
                },
                Stage::AwaitingResponse => return Poll::Pending,
            }
        }
    }

    pub fn handle_response<R: RngCore>(
        &mut self,
        resp: &Response,
        clock: &impl Clock,
        rand: &mut Rand<R>,
    ) -> ResponseVerdict {
        if !matches!(self.stage, Stage::AwaitingResponse) {
            return ResponseVerdict::Invalid;
        }
        match resp {
            Response::Cs(CarrierState::Clear) => {
                self.resolved = Some(CarrierSenseOutcome::Clear);
                ResponseVerdict::Handled
            }
            Response::Cs(CarrierState::Busy) => {
                self.retry(clock, rand);
                ResponseVerdict::Handled
            }
            _ => ResponseVerdict::Invalid,
        }
    }

    /// Call when the response line for `@CS` failed to parse at all.
    pub fn handle_parse_error<R: RngCore>(&mut self, clock: &impl Clock, rand: &mut Rand<R>) {
        if matches!(self.stage, Stage::AwaitingResponse) {
            self.retry(clock, rand);
        }
    }

    fn retry<R: RngCore>(&mut self, clock: &impl Clock, rand: &mut Rand<R>) {
        self.attempts += 1;
        if self.attempts >= UHF_CS_MAX_RETRY_COUNT {
            self.resolved = Some(CarrierSenseOutcome::Failed(CsFailure));
            return;
        }
        let jitter = rand.gen_u8(0, UHF_CS_BACKOFF_RANGE_MS) + UHF_CS_BACKOFF_OFFSET_MS;
        self.stage = Stage::Backoff(Delay::new(clock, Duration::from_millis(jitter as u64)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::MockStream;
    use crate::time::MockClock;
    use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};

    fn rand() -> Rand<ChaCha8Rng> {
        Rand::new(ChaCha8Rng::from_seed([3u8; 32]))
    }

    #[test]
    fn clear_on_first_en() {
        let clock = MockClock::new();
        let mut rand = rand();
        let mut stream = MockStream::new();
        let mut task = CarrierSenseTask::new(&clock, &mut rand);
        clock.advance(crate::time::Duration::from_millis(200));
        assert!(task.execute(&mut stream, &clock).is_pending());
        assert_eq!(&stream.written, b"@CS\r\n");
        let verdict = task.handle_response(&Response::Cs(CarrierState::Clear), &clock, &mut rand);
        assert_eq!(verdict, ResponseVerdict::Handled);
        assert_eq!(
            task.execute(&mut stream, &clock),
            Poll::Ready(CarrierSenseOutcome::Clear)
        );
    }

    #[test]
    fn exhausts_retries_on_repeated_dn() {
        let clock = MockClock::new();
        let mut rand = rand();
        let mut stream = MockStream::new();
        let mut task = CarrierSenseTask::new(&clock, &mut rand);
        for _ in 0..UHF_CS_MAX_RETRY_COUNT {
            clock.advance(crate::time::Duration::from_millis(200));
            assert!(task.execute(&mut stream, &clock).is_pending());
            task.handle_response(&Response::Cs(CarrierState::Busy), &clock, &mut rand);
        }
        clock.advance(crate::time::Duration::from_millis(200));
        assert_eq!(
            task.execute(&mut stream, &clock),
            Poll::Ready(CarrierSenseOutcome::Failed(CsFailure))
        );
    }
}
