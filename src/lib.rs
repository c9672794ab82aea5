//! Drives a GDB subprocess over the MI (machine interface) protocol and
//! maps the memory reachable from the live stack frames of the debugged
//! program. The target's terminal I/O runs over a dedicated pty so MI
//! records and program output never mix.

pub mod config;
pub mod debugger;
pub mod error;
pub mod mi;
pub mod models;
pub mod pty;
pub mod traverse;

pub use config::Config;
pub use debugger::Debugger;
pub use error::{AppError, AppResult};
pub use models::{Chunk, Frame, LocalVar, TraversalReport, VarInfo, Variable};
pub use traverse::Inspector;
