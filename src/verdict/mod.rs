//! Outcomes, cases and suites
//!
//! Outcomes are derived as pure functions over how a unit ended.

pub mod classify;
pub mod suite;

pub use suite::{Outcome, OutcomeCounts, TestCase, TestSuite};
