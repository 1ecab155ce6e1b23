/// Outcome classification
///
/// Pure functions from how a unit ended (or why it never ran) to the
/// recorded outcome and message.
use crate::config::types::HarnessError;
use crate::unit::timeout::RunOutcome;
use crate::unit::UnitError;
use crate::verdict::suite::Outcome;
use std::time::Duration;

/// Marker carried by every timeout message
pub const TIMEOUT_MARKER: &str = "Timeout:";

/// Outcome and message for a finished invocation
pub fn classify(outcome: &RunOutcome) -> (Outcome, String) {
    match outcome {
        RunOutcome::Completed(Ok(())) => (Outcome::Success, String::new()),
        RunOutcome::Completed(Err(UnitError::Failed(message))) => {
            (Outcome::Failure, message.clone())
        }
        RunOutcome::Completed(Err(UnitError::Environment(err))) => {
            (Outcome::Error, harness_message(err))
        }
        RunOutcome::Completed(Err(UnitError::Internal(err))) => {
            (Outcome::Error, format!("Internal error: {:#}", err))
        }
        RunOutcome::Panicked(message) => (
            Outcome::Error,
            format!("Internal error: check panicked: {}", message),
        ),
        RunOutcome::TimedOut(limit) => (Outcome::Failure, timeout_message(*limit)),
    }
}

fn harness_message(err: &HarnessError) -> String {
    if err.is_environment() {
        // Already prefixed by its Display impl for spawn failures.
        match err {
            HarnessError::Privilege(_) => format!("Execution environment error: {}", err),
            _ => err.to_string(),
        }
    } else {
        format!("Internal error: {}", err)
    }
}

pub fn timeout_message(limit: Duration) -> String {
    format!(
        "{} test did not finish within {:.2} seconds",
        TIMEOUT_MARKER,
        limit.as_secs_f64()
    )
}

/// Why a unit cannot run, given the outcomes recorded so far.
///
/// `lookup` returns the recorded outcome of a prerequisite, or `None` if it
/// has not run in this suite run.
pub fn unmet_requirements<F>(requires: &[String], lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<Outcome>,
{
    let unmet: Vec<String> = requires
        .iter()
        .filter_map(|name| match lookup(name) {
            Some(Outcome::Success) => None,
            Some(outcome) => Some(format!("\"{}\" ({})", name, outcome)),
            None => Some(format!("\"{}\" (not run)", name)),
        })
        .collect();

    if unmet.is_empty() {
        None
    } else {
        Some(format!(
            "Skipped because of unmet requirement{}: {}",
            if unmet.len() == 1 { "" } else { "s" },
            unmet.join(", ")
        ))
    }
}
