//! Logging macros.
//!
//! Every discard, retry, or timeout path in this crate logs through one of
//! these. With the `defmt-logging` feature enabled they expand to the
//! matching `defmt` macro; otherwise they evaluate their arguments (so type
//! errors still surface) and produce nothing.

#![allow(unused_macros)]

#[cfg(feature = "defmt-logging")]
macro_rules! mesh_log {
    (trace, $($arg:expr),* $(,)?) => { defmt::trace!($($arg),*) };
    (debug, $($arg:expr),* $(,)?) => { defmt::debug!($($arg),*) };
    (info,  $($arg:expr),* $(,)?) => { defmt::info!($($arg),*) };
    (warn,  $($arg:expr),* $(,)?) => { defmt::warn!($($arg),*) };
    (error, $($arg:expr),* $(,)?) => { defmt::error!($($arg),*) };
}

#[cfg(not(feature = "defmt-logging"))]
macro_rules! mesh_log {
    ($level:ident, $($arg:expr),* $(,)?) => {{
        $( let _ = &$arg; )*
    }};
}

macro_rules! mesh_trace {
    ($($arg:expr),* $(,)?) => { mesh_log!(trace, $($arg),*) };
}

macro_rules! mesh_debug {
    ($($arg:expr),* $(,)?) => { mesh_log!(debug, $($arg),*) };
}

macro_rules! mesh_info {
    ($($arg:expr),* $(,)?) => { mesh_log!(info, $($arg),*) };
}

macro_rules! mesh_warn {
    ($($arg:expr),* $(,)?) => { mesh_log!(warn, $($arg),*) };
}

macro_rules! mesh_error {
    ($($arg:expr),* $(,)?) => { mesh_log!(error, $($arg),*) };
}

pub(crate) use mesh_debug;
pub(crate) use mesh_error;
pub(crate) use mesh_info;
pub(crate) use mesh_trace;
pub(crate) use mesh_warn;
