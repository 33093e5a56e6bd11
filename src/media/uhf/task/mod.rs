//! The UHF driver's task machinery (`spec.md` §4.6): initialization, CSMA
//! send, and interrupt-driven receive, each a tagged-sum state machine
//! driven from the shared task slot in [`super::UhfMedium`].

pub mod carrier_sense;
pub mod init;
pub mod receive;
pub mod send_data;

pub use carrier_sense::{CarrierSenseOutcome, CarrierSenseTask};
pub use init::{InitOutcome, InitTask};
pub use receive::ReceiveTask;
pub use send_data::{SendDataOutcome, SendDataTask};

/// Outcome of offering a parsed response to a task's `handle_response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseVerdict {
    /// The task consumed this response; nothing more to do with it.
    Handled,
    /// This response isn't meant for the task in its current state.
    Invalid,
}

/// Outcome of asking an in-progress main task to yield the line to an
/// incoming `DR` receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// The task paused cleanly and can be resumed (or restarted) later.
    Interrupted,
    /// The task was mid-transmission and had to be abandoned outright.
    Aborted,
}
