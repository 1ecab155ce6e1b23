//! Report export
//!
//! Suites are written as JUnit XML. All captured text is stripped of
//! terminal escapes and XML-invalid characters, escaped and capped before
//! it reaches the file.

pub mod junit;
pub mod sanitize;

pub use junit::JunitReport;
