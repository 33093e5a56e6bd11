//! Media drivers: turn a byte-oriented transport into the uniform frame
//! abstraction the broker speaks (`spec.md` §1, C6/C7).

pub mod serial;
pub mod uhf;
