//! Five-step UHF initialization sequence (`spec.md` §4.6), grounded on the
//! original's `Initializer` plus its three per-command tasks
//! (`IncludeRouteInformationTask`, `GetSerialNumberTask`,
//! `SetEquipmentIdTask`). Unlike the original, which queues each step as its
//! own executor task, this runs the whole sequence as a single main-task-slot
//! occupant: the single-task-at-a-time invariant still holds, and each step
//! still carries its own 5-second deadline via an internally-reset [`Delay`].

use crate::io::Writable;
use crate::media::uhf::response::{hex_digit, Response};
use crate::poll::Poll;
use crate::serde::ser::{to_hex_char, StaticSpan};
use crate::time::{Clock, Delay, Duration};

use super::ResponseVerdict;

const RION_COMMAND: [u8; 7] = *b"@RION\r\n";
const SN_COMMAND: [u8; 5] = *b"@SN\r\n";
const STEP_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Ready(u8),
    Failed,
}

enum Stage {
    SendRion(StaticSpan<7>),
    AwaitRi,
    SendSn(StaticSpan<5>),
    AwaitSn,
    SendEi(StaticSpan<7>),
    AwaitEi,
}

fn ei_command(modem_id: u8) -> [u8; 7] {
    [
        b'@',
        b'E',
        b'I',
        to_hex_char(modem_id >> 4),
        to_hex_char(modem_id & 0xF),
        b'\r',
        b'\n',
    ]
}

/// The low byte of the serial number, read as the last two ASCII hex digits
/// of its 9-character body.
fn derive_modem_id(body: &[u8]) -> Option<u8> {
    let tail = body.len().checked_sub(2)?;
    Some((hex_digit(body[tail])? << 4) | hex_digit(body[tail + 1])?)
}

pub struct InitTask {
    stage: Stage,
    step_timeout: Delay,
    modem_id: u8,
    resolved: Option<InitOutcome>,
}

impl InitTask {
    pub fn new(clock: &impl Clock) -> Self {
        Self {
            stage: Stage::SendRion(StaticSpan::new(RION_COMMAND)),
            step_timeout: Delay::new(clock, Duration::from_millis(STEP_TIMEOUT_MS)),
            modem_id: 0,
            resolved: None,
        }
    }

    pub fn execute<W: Writable>(
        &mut self,
        stream: &mut W,
        clock: &impl Clock,
    ) -> Poll<InitOutcome> {
        if let Some(outcome) = self.resolved.take() {
            return Poll::Ready(outcome);
        }
        if self.step_timeout.poll(clock).is_ready() {
            return Poll::Ready(InitOutcome::Failed);
        }
        loop {
            match &mut self.stage {
                Stage::SendRion(span) => match span.poll_serialize(stream) {
                    Poll::Ready(_) => self.stage = Stage::AwaitRi,
                    Poll::Pending => return Poll::Pending,
                },
                Stage::AwaitRi => return Poll::Pending,
                Stage::SendSn(span) => match span.poll_serialize(stream) {
                    Poll::Ready(_) => self.stage = Stage::AwaitSn,
                    Poll::Pending => return Poll::Pending,
                },
                Stage::AwaitSn => return Poll::Pending,
                Stage::SendEi(span) => match span.poll_serialize(stream) {
                    Poll::Ready(_) => self.stage = Stage::AwaitEi,
                    Poll::Pending => return Poll::Pending,
                },
                Stage::AwaitEi => return Poll::Pending,
            }
        }
    }

    pub fn handle_response(&mut self, resp: &Response, clock: &impl Clock) -> ResponseVerdict {
        match (&self.stage, resp) {
            (Stage::AwaitRi, Response::Ri) => {
                self.stage = Stage::SendSn(StaticSpan::new(SN_COMMAND));
            }
            (Stage::AwaitSn, Response::Sn(body)) => match derive_modem_id(body) {
                Some(id) => {
                    self.modem_id = id;
                    self.stage = Stage::SendEi(StaticSpan::new(ei_command(id)));
                }
                None => {
                    self.resolved = Some(InitOutcome::Failed);
                    return ResponseVerdict::Handled;
                }
            },
            (Stage::AwaitEi, Response::Ei) => {
                self.resolved = Some(InitOutcome::Ready(self.modem_id));
            }
            _ => return ResponseVerdict::Invalid,
        }
        self.step_timeout = Delay::new(clock, Duration::from_millis(STEP_TIMEOUT_MS));
        ResponseVerdict::Handled
    }

    /// Re-sends whichever step is currently in flight, mirroring the
    /// original's per-command tasks (`task_ = Task{COMMAND}`), which always
    /// resume rather than restarting the whole five-step sequence.
    pub fn interrupt(&mut self, clock: &impl Clock) -> super::InterruptOutcome {
        self.stage = match &self.stage {
            Stage::SendRion(_) | Stage::AwaitRi => Stage::SendRion(StaticSpan::new(RION_COMMAND)),
            Stage::SendSn(_) | Stage::AwaitSn => Stage::SendSn(StaticSpan::new(SN_COMMAND)),
            Stage::SendEi(_) | Stage::AwaitEi => {
                Stage::SendEi(StaticSpan::new(ei_command(self.modem_id)))
            }
        };
        self.step_timeout = Delay::new(clock, Duration::from_millis(STEP_TIMEOUT_MS));
        super::InterruptOutcome::Interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::MockStream;
    use crate::time::MockClock;
    use heapless::Vec as HVec;

    #[test]
    fn full_sequence_resolves_modem_id_from_serial_tail() {
        let clock = MockClock::new();
        let mut stream = MockStream::new();
        let mut task = InitTask::new(&clock);

        assert!(task.execute(&mut stream, &clock).is_pending());
        assert_eq!(&stream.written, b"@RION\r\n");
        assert_eq!(
            task.handle_response(&Response::Ri, &clock),
            ResponseVerdict::Handled
        );

        stream.written.clear();
        assert!(task.execute(&mut stream, &clock).is_pending());
        assert_eq!(&stream.written, b"@SN\r\n");
        let mut body: HVec<u8, 16> = HVec::new();
        body.extend_from_slice(b"012345003").unwrap();
        assert_eq!(
            task.handle_response(&Response::Sn(body), &clock),
            ResponseVerdict::Handled
        );

        stream.written.clear();
        assert!(task.execute(&mut stream, &clock).is_pending());
        assert_eq!(&stream.written, b"@EI03\r\n");
        assert_eq!(
            task.handle_response(&Response::Ei, &clock),
            ResponseVerdict::Handled
        );

        assert_eq!(
            task.execute(&mut stream, &clock),
            Poll::Ready(InitOutcome::Ready(0x03))
        );
    }

    #[test]
    fn step_timeout_fails_the_whole_sequence() {
        let clock = MockClock::new();
        let mut stream = MockStream::new();
        let mut task = InitTask::new(&clock);
        task.execute(&mut stream, &clock);
        task.handle_response(&Response::Ri, &clock);

        clock.advance(Duration::from_millis(STEP_TIMEOUT_MS));
        assert_eq!(
            task.execute(&mut stream, &clock),
            Poll::Ready(InitOutcome::Failed)
        );
    }
}
