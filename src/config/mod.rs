//! Configuration & shared types
//!
//! Harness tunables and the closed enums/error type used by every module.

pub mod settings;
pub mod types;
