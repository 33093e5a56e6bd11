//! UHF media driver (`spec.md` §4.6, C7): an ASCII command/response modem
//! protocol, driven by a single main-task slot plus an interrupt-driven
//! receive task, grounded on the original's `media::uhf::Interactor` and
//! its `TaskExecutor`.

pub mod response;
pub mod task;

use rand_core::RngCore;

use crate::frame::FramePool;
use crate::io::ReadableWritable;
use crate::link::address::AddressKind;
use crate::link::broker::Broker;
use crate::lock::Lock;
use crate::poll::Poll;
use crate::rand::Rand;
use crate::serde::de::DeserializeResult;
use crate::time::{Clock, Delay, Duration};

use response::{Response, ResponseReader};
use task::{InitOutcome, InitTask, InterruptOutcome, ReceiveTask, ResponseVerdict, SendDataTask};

const TASK_TIMEOUT_MS: u64 = 5_000;

enum MainTask<R: RngCore> {
    Init(InitTask),
    Send(SendDataTask),
}

impl<R: RngCore> MainTask<R> {
    fn handle_response(&mut self, resp: &Response, clock: &impl Clock, rand: &mut Rand<R>) -> ResponseVerdict {
        match self {
            MainTask::Init(t) => t.handle_response(resp, clock),
            MainTask::Send(t) => t.handle_response(resp, clock, rand),
        }
    }

    fn handle_parse_error(&mut self, clock: &impl Clock, rand: &mut Rand<R>) {
        if let MainTask::Send(t) = self {
            t.handle_parse_error(clock, rand);
        }
    }

    fn interrupt(&mut self, clock: &impl Clock, rand: &mut Rand<R>) -> InterruptOutcome {
        match self {
            MainTask::Init(t) => t.interrupt(clock),
            MainTask::Send(t) => t.interrupt(clock, rand),
        }
    }
}

/// Drives a UHF modem over an ASCII command/response byte stream.
pub struct UhfMedium<'a, S, R: RngCore> {
    stream: S,
    broker: &'a Lock<Broker>,
    local_address: Option<u8>,
    task: Option<MainTask<R>>,
    task_timeout: Option<Delay>,
    receive: Option<ReceiveTask>,
    response: ResponseReader,
    rand: Rand<R>,
}

impl<'a, S: ReadableWritable, R: RngCore> UhfMedium<'a, S, R> {
    pub fn new(stream: S, broker: &'a Lock<Broker>, rand: R, clock: &impl Clock) -> Self {
        {
            let mut guard = broker.poll_lock().unwrap();
            guard.attach_medium(AddressKind::Uhf);
        }
        Self {
            stream,
            broker,
            local_address: None,
            task: Some(MainTask::Init(InitTask::new(clock))),
            task_timeout: Some(Delay::new(clock, Duration::from_millis(TASK_TIMEOUT_MS))),
            receive: None,
            response: ResponseReader::new(),
            rand: Rand::new(rand),
        }
    }

    pub fn local_address(&self) -> Option<u8> {
        self.local_address
    }

    pub fn execute(&mut self, pool: &mut FramePool, clock: &impl Clock) {
        self.poll_receive_task(pool, clock);
        self.poll_task_timeout(clock);
        self.fill_send_slot(clock);
        self.poll_main_task(clock);
        self.poll_response(clock);
    }

    fn poll_receive_task(&mut self, pool: &mut FramePool, clock: &impl Clock) {
        let Some(task) = &mut self.receive else { return };
        if task.execute(pool, self.broker).is_ready() {
            self.receive = None;
            if self.task.is_some() {
                self.task_timeout = Some(Delay::new(clock, Duration::from_millis(TASK_TIMEOUT_MS)));
            }
        }
    }

    fn poll_task_timeout(&mut self, clock: &impl Clock) {
        if self.task.is_none() {
            return;
        }
        if self.receive.is_some() {
            // a DR interruption is in flight; the timeout is held off until
            // it resolves (reset in `poll_receive_task`).
            return;
        }
        if self.task_timeout.as_ref().is_some_and(|d| d.is_expired(clock)) {
            crate::mesh_warn!("uhf: main task timed out");
            self.task = None;
            self.task_timeout = None;
        }
    }

    fn fill_send_slot(&mut self, clock: &impl Clock) {
        if self.task.is_some() {
            return;
        }
        let mut guard = match self.broker.poll_lock() {
            Poll::Ready(g) => g,
            Poll::Pending => return,
        };
        loop {
            let item = match guard.poll_next_tx() {
                Poll::Ready(item) => item,
                Poll::Pending => return,
            };
            let Some(dest) = item.address.as_uhf_id() else {
                continue;
            };
            drop(guard);
            self.task = Some(MainTask::Send(SendDataTask::new(
                item.protocol.0,
                dest,
                item.reader,
                clock,
                &mut self.rand,
            )));
            self.task_timeout = Some(Delay::new(clock, Duration::from_millis(TASK_TIMEOUT_MS)));
            return;
        }
    }

    fn poll_main_task(&mut self, clock: &impl Clock) {
        let Some(task) = &mut self.task else { return };
        let done = match task {
            MainTask::Init(t) => match t.execute(&mut self.stream, clock) {
                Poll::Ready(InitOutcome::Ready(id)) => {
                    self.local_address = Some(id);
                    true
                }
                Poll::Ready(InitOutcome::Failed) => {
                    crate::mesh_warn!("uhf: initialization failed, restarting");
                    self.task = Some(MainTask::Init(InitTask::new(clock)));
                    self.task_timeout = Some(Delay::new(clock, Duration::from_millis(TASK_TIMEOUT_MS)));
                    false
                }
                Poll::Pending => false,
            },
            MainTask::Send(t) => match t.execute(&mut self.stream, clock, &mut self.rand) {
                Poll::Ready(_) => true,
                Poll::Pending => false,
            },
        };
        if done {
            self.task = None;
            self.task_timeout = None;
        }
    }

    fn poll_response(&mut self, clock: &impl Clock) {
        match self.response.poll_deserialize(&mut self.stream) {
            Poll::Pending => {}
            Poll::Ready(DeserializeResult::Ok) => {
                let resp = self.response.result();
                self.response = ResponseReader::new();
                self.route_response(resp, clock);
            }
            Poll::Ready(_) => {
                self.response = ResponseReader::new();
                if let Some(task) = &mut self.task {
                    task.handle_parse_error(clock, &mut self.rand);
                }
            }
        }
    }

    fn route_response(&mut self, resp: Response, clock: &impl Clock) {
        if let Response::Dr(data) = resp {
            if let Some(task) = &mut self.task {
                if task.interrupt(clock, &mut self.rand) == InterruptOutcome::Aborted {
                    self.task = None;
                    self.task_timeout = None;
                }
            }
            self.receive = Some(ReceiveTask::new(data));
            return;
        }
        if let Some(task) = &mut self.task {
            let _ = task.handle_response(&resp, clock, &mut self.rand);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SHORT_LEN;
    use crate::frame::FramePoolStorage;
    use crate::io::mock::MockStream;
    use crate::link::frame::Protocol;
    use crate::time::MockClock;
    use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};

    fn rand() -> ChaCha8Rng {
        ChaCha8Rng::from_seed([7u8; 32])
    }

    fn run_init(medium: &mut UhfMedium<MockStream, ChaCha8Rng>, pool: &mut FramePool, clock: &MockClock) {
        medium.execute(pool, clock);
        assert_eq!(&medium.stream.written, b"@RION\r\n");
        medium.stream.written.clear();
        medium.stream.feed(b"*RI=OK\r\n");

        medium.execute(pool, clock);
        medium.execute(pool, clock);
        assert_eq!(&medium.stream.written, b"@SN\r\n");
        medium.stream.written.clear();
        medium.stream.feed(b"*SN=012345003\r\n");

        medium.execute(pool, clock);
        medium.execute(pool, clock);
        assert_eq!(&medium.stream.written, b"@EI03\r\n");
        medium.stream.written.clear();
        medium.stream.feed(b"*EI=OK\r\n");

        medium.execute(pool, clock);
        medium.execute(pool, clock);
        assert_eq!(medium.local_address(), Some(0x03));
        assert!(medium.task.is_none());
    }

    #[test]
    fn runs_initialization_sequence_and_resolves_local_address() {
        static STORAGE: FramePoolStorage = FramePoolStorage::new();
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        let mut pool = STORAGE.take().unwrap();
        let clock = MockClock::new();
        let mut medium = UhfMedium::new(MockStream::new(), &BROKER, rand(), &clock);

        run_init(&mut medium, &mut pool, &clock);
    }

    #[test]
    fn dr_arrival_after_init_dispatches_to_registered_socket() {
        static STORAGE: FramePoolStorage = FramePoolStorage::new();
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        let mut pool = STORAGE.take().unwrap();
        let clock = MockClock::new();
        let mut medium = UhfMedium::new(MockStream::new(), &BROKER, rand(), &clock);
        run_init(&mut medium, &mut pool, &clock);

        let handle = {
            let mut guard = BROKER.poll_lock().unwrap();
            guard.register(Protocol(0x10)).unwrap()
        };

        medium.stream.feed(b"*DR=0310DEAD/RC4\r\n");
        medium.execute(&mut pool, &clock);
        medium.execute(&mut pool, &clock);

        let mut guard = BROKER.poll_lock().unwrap();
        let frame = guard.poll_dequeue_rx(handle).ready().expect("dispatched");
        assert_eq!(frame.remote.as_uhf_id(), Some(0xC4));
        assert_eq!(frame.reader.frame_length(), 2);
    }

    #[test]
    fn queued_tx_item_for_uhf_address_starts_a_send_task() {
        static STORAGE: FramePoolStorage = FramePoolStorage::new();
        static BROKER: Lock<Broker> = Lock::new(Broker::new());
        let mut pool = STORAGE.take().unwrap();
        let clock = MockClock::new();
        let mut medium = UhfMedium::new(MockStream::new(), &BROKER, rand(), &clock);
        run_init(&mut medium, &mut pool, &clock);

        let (mut w, r) = pool.allocate(SHORT_LEN).unwrap();
        w.write(&[0xAB]).unwrap();
        w.shrink_frame_length_to_fit();
        {
            let mut guard = BROKER.poll_lock().unwrap();
            guard
                .poll_enqueue_tx(crate::link::address::Address::uhf(0xC4), Protocol(0x10), r)
                .unwrap();
        }

        medium.execute(&mut pool, &clock);
        assert!(matches!(medium.task, Some(MainTask::Send(_))));
    }
}
