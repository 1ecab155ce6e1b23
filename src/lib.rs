//! gradebox: a test harness for grading interactive console programs
//! Runs a student's program behind pseudo-terminals, drives it through its
//! standard streams and records every check as a JUnit test case
//!
//! # Architecture
//!
//! The crate is organized by concern, bottom-up:
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Shared closed enums, [`HarnessError`] and the `Result` alias
//! - [`config::settings`]: Harness tunables, JSON loading and validation
//!
//! ## Process Supervision ([`process`])
//! - [`process::pty`]: Pseudo-terminal allocation with echo suppression
//! - [`process::reader`]: Background stream readers and line FIFOs
//! - [`process::signal`]: Process-group signalling and TERM to KILL escalation
//! - [`process::credentials`]: Optional demotion to another OS user
//! - [`process::supervised`]: The supervised subject process
//!
//! ## Test Units ([`unit`])
//! - [`unit::TestUnit`]: Contract every check implements
//! - [`unit::timeout`]: Wall-clock deadline around a check
//!
//! ## Execution ([`scheduler`])
//! - [`scheduler::budget`]: Console output quota and per-check capture
//! - [`scheduler::orchestrator`]: Dependency-aware sequential runner
//!
//! ## Outcomes & Reports ([`verdict`], [`report`])
//! - [`verdict::suite`]: Outcomes, cases and suites
//! - [`verdict::classify`]: Outcome classification
//! - [`report::junit`]: JUnit XML export with sanitized text
//!
//! ## Checks ([`checks`])
//! - Generic command, scripted and closure checks plus the JSON manifest
//!
//! # Design Principles
//!
//! 1. **Exit is evidence** - A process is done only after a grace period
//!    past the first observed exit, so its last output is not lost
//! 2. **Kill the group** - Signals go to the whole process group
//! 3. **Cleanup on every path** - Processes started by a check are killed
//!    and reaped however the check ended
//! 4. **Environment is not the student** - Spawn and privilege problems are
//!    errors, never failures

// Configuration
pub mod config;

// Process Supervision
pub mod process;

// Test Units
pub mod unit;

// Execution
pub mod scheduler;

// Outcomes & Reports
pub mod report;
pub mod verdict;

// Generic checks
pub mod checks;

// CLI entrypoint wiring for the gradebox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::settings::HarnessConfig;
pub use config::types::*;
pub use process::{ProcessSpec, SupervisedProcess};
pub use scheduler::Orchestrator;
pub use unit::{fail, TestContext, TestUnit, UnitDescriptor, UnitError};
pub use verdict::{Outcome, TestCase, TestSuite};
