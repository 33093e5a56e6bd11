//! Send-one-frame task: carrier sense, `@DT` command, optional `IR` wait,
//! with an outer CSMA+send retry loop on interference (`spec.md` §4.6).

use rand_core::RngCore;

use crate::config::{UHF_IR_WAIT_MS, UHF_SEND_MAX_RETRY_COUNT};
use crate::error::CsFailure;
use crate::frame::FrameReader;
use crate::io::{Readable, Writable};
use crate::media::uhf::response::Response;
use crate::poll::Poll;
use crate::rand::Rand;
use crate::serde::ser::to_hex_char;
use crate::time::{Clock, Delay, Duration};

use super::{CarrierSenseOutcome, CarrierSenseTask, ResponseVerdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDataOutcome {
    Ok,
    CsFailure(CsFailure),
}

enum SendStage {
    Prefix { buf: [u8; 7], idx: usize },
    Payload,
    Suffix { buf: [u8; 6], idx: usize },
}

enum Stage {
    CarrierSense(CarrierSenseTask),
    SendCommand(SendStage),
    AwaitDtAck,
    AwaitIr(Delay),
}

/// Drives one outbound frame through CSMA, the `@DT` command, and the
/// post-send interference window, retrying the whole cycle up to
/// [`UHF_SEND_MAX_RETRY_COUNT`] times if an `IR` response arrives.
pub struct SendDataTask {
    stage: Stage,
    payload: FrameReader,
    protocol: u8,
    destination: u8,
    retries: u8,
    resolved: Option<SendDataOutcome>,
}

impl SendDataTask {
    pub fn new<R: RngCore>(
        protocol: u8,
        destination: u8,
        payload: FrameReader,
        clock: &impl Clock,
        rand: &mut Rand<R>,
    ) -> Self {
        Self {
            stage: Stage::CarrierSense(CarrierSenseTask::new(clock, rand)),
            payload,
            protocol,
            destination,
            retries: 0,
            resolved: None,
        }
    }

    /// `LL` counts the protocol byte that follows it, matching the `DR`
    /// response's own length field.
    fn build_prefix(&self) -> [u8; 7] {
        let len = self.payload.frame_length() as u8 + 1;
        [
            b'@',
            b'D',
            b'T',
            to_hex_char(len >> 4),
            to_hex_char(len & 0xF),
            to_hex_char(self.protocol >> 4),
            to_hex_char(self.protocol & 0xF),
        ]
    }

    fn build_suffix(&self) -> [u8; 6] {
        [
            b'/',
            b'R',
            to_hex_char(self.destination >> 4),
            to_hex_char(self.destination & 0xF),
            b'\r',
            b'\n',
        ]
    }

    pub fn execute<S: Readable + Writable, R: RngCore>(
        &mut self,
        stream: &mut S,
        clock: &impl Clock,
        rand: &mut Rand<R>,
    ) -> Poll<SendDataOutcome> {
        if let Some(outcome) = self.resolved.take() {
            return Poll::Ready(outcome);
        }
        loop {
            match &mut self.stage {
                Stage::CarrierSense(cs) => match cs.execute(stream, clock) {
                    Poll::Ready(CarrierSenseOutcome::Clear) => {
                        self.stage = Stage::SendCommand(SendStage::Prefix {
                            buf: self.build_prefix(),
                            idx: 0,
                        });
                    }
                    Poll::Ready(CarrierSenseOutcome::Failed(e)) => {
                        return Poll::Ready(SendDataOutcome::CsFailure(e));
                    }
                    Poll::Pending => return Poll::Pending,
                },
                Stage::SendCommand(send_stage) => match send_stage {
                    SendStage::Prefix { buf, idx } => {
                        while *idx < buf.len() {
                            if stream.poll_writable(1).is_pending() {
                                return Poll::Pending;
                            }
                            stream.write_unchecked(buf[*idx]);
                            *idx += 1;
                        }
                        self.stage = Stage::SendCommand(SendStage::Payload);
                    }
                    SendStage::Payload => {
                        while !self.payload.is_all_read() {
                            if stream.poll_writable(1).is_pending()
                                || self.payload.poll_readable(1).is_pending()
                            {
                                return Poll::Pending;
                            }
                            let b = self.payload.read_unchecked();
                            stream.write_unchecked(b);
                        }
                        self.stage = Stage::SendCommand(SendStage::Suffix {
                            buf: self.build_suffix(),
                            idx: 0,
                        });
                    }
                    SendStage::Suffix { buf, idx } => {
                        while *idx < buf.len() {
                            if stream.poll_writable(1).is_pending() {
                                return Poll::Pending;
                            }
                            stream.write_unchecked(buf[*idx]);
                            *idx += 1;
                        }
                        self.stage = Stage::AwaitDtAck;
                    }
                },
                Stage::AwaitDtAck => return Poll::Pending,
                Stage::AwaitIr(delay) => {
                    if delay.poll(clock).is_pending() {
                        return Poll::Pending;
                    }
                    return Poll::Ready(SendDataOutcome::Ok);
                }
            }
        }
    }

    pub fn handle_response<R: RngCore>(
        &mut self,
        resp: &Response,
        clock: &impl Clock,
        rand: &mut Rand<R>,
    ) -> ResponseVerdict {
        match &mut self.stage {
            Stage::CarrierSense(cs) => cs.handle_response(resp, clock, rand),
            Stage::AwaitDtAck => match resp {
                Response::Dt(_) => {
                    self.stage = Stage::AwaitIr(Delay::new(clock, Duration::from_millis(UHF_IR_WAIT_MS)));
                    ResponseVerdict::Handled
                }
                _ => ResponseVerdict::Invalid,
            },
            Stage::AwaitIr(_) => match resp {
                Response::Ir => {
                    self.retries += 1;
                    if self.retries >= UHF_SEND_MAX_RETRY_COUNT {
                        self.resolved = Some(SendDataOutcome::CsFailure(CsFailure));
                    } else {
                        self.stage = Stage::CarrierSense(CarrierSenseTask::new(clock, rand));
                    }
                    ResponseVerdict::Handled
                }
                _ => ResponseVerdict::Invalid,
            },
            Stage::SendCommand(_) => ResponseVerdict::Invalid,
        }
    }

    /// Forwarded when a response line failed to parse at all; only
    /// meaningful while waiting on the embedded carrier-sense command.
    pub fn handle_parse_error<R: RngCore>(&mut self, clock: &impl Clock, rand: &mut Rand<R>) {
        if let Stage::CarrierSense(cs) = &mut self.stage {
            cs.handle_parse_error(clock, rand);
        }
    }

    /// A `DR` arrived while this task was active. Restarts the send cycle
    /// from a fresh carrier sense, same as the original's `SendDataTask`,
    /// which always resumes rather than discarding outstanding work.
    pub fn interrupt<R: RngCore>(&mut self, clock: &impl Clock, rand: &mut Rand<R>) -> super::InterruptOutcome {
        self.stage = Stage::CarrierSense(CarrierSenseTask::new(clock, rand));
        super::InterruptOutcome::Interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SHORT_LEN;
    use crate::frame::FramePoolStorage;
    use crate::io::mock::MockStream;
    use crate::media::uhf::response::CarrierState;
    use crate::time::MockClock;
    use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};

    fn rand() -> Rand<ChaCha8Rng> {
        Rand::new(ChaCha8Rng::from_seed([9u8; 32]))
    }

    #[test]
    fn s1_happy_path_sends_cs_then_dt_and_resolves_after_ir_window() {
        static STORAGE: FramePoolStorage = FramePoolStorage::new();
        let mut pool = STORAGE.take().unwrap();
        let (mut w, r) = pool.allocate(SHORT_LEN).unwrap();
        w.write(&[0xDE, 0xAD]).unwrap();
        w.shrink_frame_length_to_fit();

        let clock = MockClock::new();
        let mut rand = rand();
        let mut stream = MockStream::new();
        let mut task = SendDataTask::new(0x10, 0xC4, r, &clock, &mut rand);

        clock.advance(Duration::from_millis(200));
        assert!(task.execute(&mut stream, &clock, &mut rand).is_pending());
        assert_eq!(&stream.written, b"@CS\r\n");
        task.handle_response(&Response::Cs(CarrierState::Clear), &clock, &mut rand);

        stream.written.clear();
        assert!(task.execute(&mut stream, &clock, &mut rand).is_pending());
        assert_eq!(&stream.written, b"@DT0310DEAD/RC4\r\n");
        task.handle_response(&Response::Dt(0), &clock, &mut rand);

        assert!(task.execute(&mut stream, &clock, &mut rand).is_pending());
        clock.advance(Duration::from_millis(UHF_IR_WAIT_MS));
        assert_eq!(
            task.execute(&mut stream, &clock, &mut rand),
            Poll::Ready(SendDataOutcome::Ok)
        );
    }

    #[test]
    fn ir_triggers_a_retry_from_carrier_sense() {
        static STORAGE: FramePoolStorage = FramePoolStorage::new();
        let mut pool = STORAGE.take().unwrap();
        let (_w, r) = pool.allocate(SHORT_LEN).unwrap();

        let clock = MockClock::new();
        let mut rand = rand();
        let mut stream = MockStream::new();
        let mut task = SendDataTask::new(0x10, 0xC4, r, &clock, &mut rand);

        clock.advance(Duration::from_millis(200));
        task.execute(&mut stream, &clock, &mut rand);
        task.handle_response(&Response::Cs(CarrierState::Clear), &clock, &mut rand);
        task.execute(&mut stream, &clock, &mut rand);
        task.handle_response(&Response::Dt(0), &clock, &mut rand);
        task.execute(&mut stream, &clock, &mut rand);

        task.handle_response(&Response::Ir, &clock, &mut rand);
        assert!(matches!(task.stage, Stage::CarrierSense(_)));
        assert_eq!(task.retries, 1);
    }
}
