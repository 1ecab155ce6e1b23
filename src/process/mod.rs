//! Supervised subject processes
//!
//! - [`supervised`]: process lifecycle, line I/O, termination detection
//! - [`reader`]: background stream drains and line FIFOs
//! - [`pty`]: pseudo-terminal allocation
//! - [`signal`]: process-group signalling
//! - [`credentials`]: optional demotion to a named user

pub mod credentials;
pub mod pty;
pub mod reader;
pub mod signal;
pub mod supervised;

pub use nix::sys::signal::Signal;
pub use supervised::{ProcessSpec, SupervisedProcess};
