/// Test cases and the suite that aggregates them
use crate::config::types::{HarnessError, Result};
use crate::scheduler::budget::CapturedText;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Result of one check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    #[default]
    Success,
    Failure,
    Error,
    Skipped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure => write!(f, "failure"),
            Outcome::Error => write!(f, "error"),
            Outcome::Skipped => write!(f, "skipped"),
        }
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(duration.as_secs_f64())
}

/// Record of one executed (or skipped) check. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestCase {
    name: String,
    outcome: Outcome,
    #[serde(serialize_with = "serialize_secs")]
    duration: Duration,
    message: String,
    stdout: String,
    stderr: String,
    tester_output: String,
}

impl TestCase {
    pub fn new(
        name: impl Into<String>,
        outcome: Outcome,
        duration: Duration,
        message: impl Into<String>,
        captured: CapturedText,
    ) -> Self {
        TestCase {
            name: name.into(),
            outcome,
            duration,
            message: message.into(),
            stdout: captured.stdout,
            stderr: captured.stderr,
            tester_output: captured.tester,
        }
    }

    /// A skipped case: never ran, so no duration and no captured output.
    pub fn skipped(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            name,
            Outcome::Skipped,
            Duration::ZERO,
            message,
            CapturedText::default(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn tester_output(&self) -> &str {
        &self.tester_output
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Totals per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub success: usize,
    pub failure: usize,
    pub error: usize,
    pub skipped: usize,
}

impl OutcomeCounts {
    pub fn total(&self) -> usize {
        self.success + self.failure + self.error + self.skipped
    }

    pub fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.success += 1,
            Outcome::Failure => self.failure += 1,
            Outcome::Error => self.error += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: OutcomeCounts) {
        self.success += other.success;
        self.failure += other.failure;
        self.error += other.error;
        self.skipped += other.skipped;
    }
}

/// Cases of one run in execution order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestSuite {
    name: String,
    timestamp: DateTime<Utc>,
    cases: Vec<TestCase>,
}

impl TestSuite {
    pub fn new(name: impl Into<String>) -> Self {
        TestSuite {
            name: name.into(),
            timestamp: Utc::now(),
            cases: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the run started
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Append a case; names are unique within a suite.
    pub fn record(&mut self, case: TestCase) -> Result<()> {
        if self.get(case.name()).is_some() {
            return Err(HarnessError::Registration(format!(
                "suite '{}' already has a case named '{}'",
                self.name,
                case.name()
            )));
        }
        self.cases.push(case);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TestCase> {
        self.cases.iter().find(|case| case.name() == name)
    }

    pub fn outcome_of(&self, name: &str) -> Option<Outcome> {
        self.get(name).map(TestCase::outcome)
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for case in &self.cases {
            counts.add(case.outcome());
        }
        counts
    }

    /// Sum of case durations
    pub fn total_duration(&self) -> Duration {
        self.cases.iter().map(TestCase::duration).sum()
    }

    pub fn all_passed(&self) -> bool {
        self.cases.iter().all(TestCase::is_success)
    }

    pub fn summary_line(&self) -> String {
        let counts = self.counts();
        format!(
            "{} tests: {} passed, {} failed, {} errors, {} skipped in {:.2}s",
            counts.total(),
            counts.success,
            counts.failure,
            counts.error,
            counts.skipped,
            self.total_duration().as_secs_f64()
        )
    }
}
