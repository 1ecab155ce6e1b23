//! Test unit contract
//!
//! A test unit is one named grading check with optional prerequisites and an
//! optional wall-clock timeout. The orchestrator depends only on
//! [`TestUnit`]; concrete checks are implementations of it.
//!
//! A check succeeds by returning `Ok(())` from [`TestUnit::run`] and fails by
//! returning [`UnitError::Failed`], usually through [`fail`] and `?`. Any other
//! error, or a panic, is recorded as an internal error.

pub mod timeout;

use crate::config::settings::HarnessConfig;
use crate::config::types::HarnessError;
use crate::process::{ProcessSpec, Signal, SupervisedProcess};
use crate::scheduler::budget::CaseCapture;
use log::warn;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

/// Name, prerequisites and timeout of a unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitDescriptor {
    name: String,
    requires: Vec<String>,
    timeout: Option<Duration>,
}

impl UnitDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        UnitDescriptor {
            name: name.into(),
            requires: Vec::new(),
            timeout: None,
        }
    }

    pub fn requires<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    /// Timeout in seconds; zero, negative or non-finite means unbounded.
    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.timeout = if secs.is_finite() && secs > 0.0 {
            Some(Duration::from_secs_f64(secs))
        } else {
            None
        };
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requirements(&self) -> &[String] {
        &self.requires
    }

    pub fn timeout_limit(&self) -> Option<Duration> {
        self.timeout
    }
}

/// How a unit's `run` ended when it did not succeed
#[derive(Debug, Error)]
pub enum UnitError {
    /// Explicit failure of the graded program
    #[error("{0}")]
    Failed(String),

    /// Harness or execution-environment problem
    #[error(transparent)]
    Environment(#[from] HarnessError),

    /// Anything else that went wrong inside the check
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<std::io::Error> for UnitError {
    fn from(err: std::io::Error) -> Self {
        UnitError::Environment(HarnessError::Io(err))
    }
}

/// Abort the running check with a failure message.
pub fn fail<T>(message: impl Into<String>) -> Result<T, UnitError> {
    Err(UnitError::Failed(message.into()))
}

/// Processes started on behalf of one check.
///
/// The orchestrator kills and cleans up everything in here once the check
/// is over, whichever way it ended. After that the slot is closed: a process
/// attached later, for example by a timed-out worker that is still running,
/// is killed and cleaned up on the spot.
#[derive(Debug, Clone, Default)]
pub struct ProcessSlot {
    state: Arc<Mutex<SlotState>>,
}

#[derive(Debug, Default)]
struct SlotState {
    processes: Vec<Arc<SupervisedProcess>>,
    closed: bool,
}

impl ProcessSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take ownership of `process`; returns false if the slot is closed,
    /// in which case the process has already been cleaned up.
    pub fn attach(&self, process: Arc<SupervisedProcess>) -> bool {
        {
            let mut state = self.lock();
            if !state.closed {
                state.processes.push(process);
                return true;
            }
        }
        warn!(
            "'{}' started after its check was closed; cleaning it up",
            process.label()
        );
        process.cleanup();
        false
    }

    /// Refuse any further processes
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// SIGKILL every attached process group; returns how many were alive.
    pub fn kill_all(&self) -> usize {
        let processes = self.lock().processes.clone();
        processes
            .iter()
            .filter(|process| process.kill(Signal::SIGKILL))
            .count()
    }

    /// Close the slot, then clean up and forget every attached process.
    pub fn cleanup_all(&self) {
        let processes = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.processes)
        };
        for process in processes {
            process.cleanup();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().processes.is_empty()
    }
}

/// Everything a running check may use
#[derive(Debug, Clone)]
pub struct TestContext {
    name: Arc<str>,
    capture: CaseCapture,
    config: Arc<HarnessConfig>,
    processes: ProcessSlot,
}

impl TestContext {
    pub fn new(name: &str, capture: CaseCapture, config: Arc<HarnessConfig>) -> Self {
        TestContext {
            name: Arc::from(name),
            capture,
            config,
            processes: ProcessSlot::default(),
        }
    }

    /// Context for driving a unit outside an orchestrator run
    pub fn detached(name: &str, config: HarnessConfig) -> Self {
        Self::new(name, CaseCapture::detached(), Arc::new(config))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write a tester message to the check's log
    pub fn log(&self, message: impl AsRef<str>) {
        self.capture.log(message);
    }

    pub fn capture(&self) -> &CaseCapture {
        &self.capture
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn processes(&self) -> &ProcessSlot {
        &self.processes
    }

    /// Start a supervised process owned by this check.
    ///
    /// Fails once the check has been cancelled or finished.
    pub fn spawn(&self, spec: &ProcessSpec) -> Result<Arc<SupervisedProcess>, HarnessError> {
        if self.processes.is_closed() {
            return Err(self.closed_error());
        }
        self.log(format!("Starting {}", spec.command.join(" ")));
        let process = Arc::new(SupervisedProcess::start(
            spec,
            &self.config,
            self.capture.clone(),
        )?);
        if !self.processes.attach(Arc::clone(&process)) {
            return Err(self.closed_error());
        }
        Ok(process)
    }

    fn closed_error(&self) -> HarnessError {
        HarnessError::Process(format!(
            "check '{}' is no longer running; not starting new processes",
            self.name
        ))
    }
}

/// One registrable grading check.
///
/// `on_timeout` and `on_failure` may run while `run` is still executing on
/// another thread and may be called more than once; implementations must be
/// idempotent. The defaults kill every process started through the context.
pub trait TestUnit: Send + Sync {
    fn descriptor(&self) -> &UnitDescriptor;

    fn run(&self, ctx: &TestContext) -> Result<(), UnitError>;

    fn on_timeout(&self, ctx: &TestContext) {
        ctx.processes().kill_all();
    }

    fn on_failure(&self, ctx: &TestContext) {
        ctx.processes().kill_all();
    }

    fn name(&self) -> &str {
        self.descriptor().name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_timeouts_are_unbounded() {
        assert_eq!(UnitDescriptor::new("a").timeout_secs(0.0).timeout_limit(), None);
        assert_eq!(UnitDescriptor::new("a").timeout_secs(-3.0).timeout_limit(), None);
        assert_eq!(UnitDescriptor::new("a").timeout_secs(f64::NAN).timeout_limit(), None);
        assert_eq!(
            UnitDescriptor::new("a").timeout_secs(1.5).timeout_limit(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(UnitDescriptor::new("a").timeout(Duration::ZERO).timeout_limit(), None);
    }

    #[test]
    fn requirements_accumulate() {
        let d = UnitDescriptor::new("c").requires(["a"]).requires(vec!["b".to_string()]);
        assert_eq!(d.requirements(), ["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn fail_builds_failed_error() {
        let result: Result<(), UnitError> = fail("bad output");
        match result {
            Err(UnitError::Failed(msg)) => assert_eq!(msg, "bad output"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn context_tracks_spawned_processes() {
        let ctx = TestContext::detached(
            "spawn",
            HarnessConfig {
                echo_console: false,
                ..HarnessConfig::default()
            },
        );
        let process = ctx.spawn(&ProcessSpec::new(["sleep", "30"])).unwrap();
        assert_eq!(ctx.processes().len(), 1);
        assert_eq!(ctx.processes().kill_all(), 1);

        ctx.processes().cleanup_all();
        assert!(ctx.processes().is_empty());
        assert!(process.is_cleaned_up());
        assert!(ctx.capture().snapshot().tester.contains("Starting sleep 30"));
    }

    #[test]
    fn closed_slot_refuses_new_processes() {
        let ctx = TestContext::detached(
            "closed",
            HarnessConfig {
                termination_grace_ms: 50,
                echo_console: false,
                ..HarnessConfig::default()
            },
        );
        ctx.processes().cleanup_all();
        assert!(ctx.processes().is_closed());
        assert!(matches!(
            ctx.spawn(&ProcessSpec::new(["sleep", "30"])),
            Err(HarnessError::Process(_))
        ));

        let late = Arc::new(
            SupervisedProcess::start(
                &ProcessSpec::new(["sleep", "30"]),
                ctx.config(),
                CaseCapture::detached(),
            )
            .unwrap(),
        );
        assert!(!ctx.processes().attach(Arc::clone(&late)));
        assert!(late.is_cleaned_up());
        assert!(ctx.processes().is_empty());
    }
}
