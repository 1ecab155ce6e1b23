//! Suite execution
//!
//! [`Orchestrator`] runs registered units in order, enforcing prerequisites
//! and timeouts, and [`budget`] holds the console quota and per-check capture
//! shared with stream readers.

pub mod budget;
pub mod orchestrator;

pub use budget::{CaseCapture, CapturedText, Channel, OutputBudget};
pub use orchestrator::Orchestrator;
