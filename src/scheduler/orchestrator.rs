/// Dependency-aware sequential executor
///
/// Units run strictly in registration order on the calling thread (a unit
/// with a timeout runs on a worker that the calling thread waits for). A
/// unit whose prerequisites did not all succeed earlier in the same run is
/// skipped without being invoked.
use crate::config::settings::HarnessConfig;
use crate::config::types::{HarnessError, Result};
use crate::report::junit::JunitReport;
use crate::scheduler::budget::{CaseCapture, Channel, OutputBudget};
use crate::unit::timeout::{panic_message, run_caught, RunOutcome, TimeoutGuard};
use crate::unit::{TestContext, TestUnit};
use crate::verdict::classify::{classify, unmet_requirements};
use crate::verdict::suite::{Outcome, TestCase, TestSuite};
use log::{error, info, warn};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

pub struct Orchestrator {
    suite_name: String,
    config: Arc<HarnessConfig>,
    units: Vec<Arc<dyn TestUnit>>,
    names: HashSet<String>,
    last_suite: Option<TestSuite>,
}

impl Orchestrator {
    pub fn new(suite_name: impl Into<String>, config: HarnessConfig) -> Self {
        Orchestrator {
            suite_name: suite_name.into(),
            config: Arc::new(config),
            units: Vec::new(),
            names: HashSet::new(),
            last_suite: None,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Register a unit; its name must not be taken yet.
    pub fn register<U: TestUnit + 'static>(&mut self, unit: U) -> Result<()> {
        self.register_shared(Arc::new(unit))
    }

    pub fn register_shared(&mut self, unit: Arc<dyn TestUnit>) -> Result<()> {
        let name = unit.name().to_string();
        if name.is_empty() {
            return Err(HarnessError::Registration(
                "test unit name cannot be empty".to_string(),
            ));
        }
        if !self.names.insert(name.clone()) {
            return Err(HarnessError::Registration(format!(
                "a test named '{}' is already registered",
                name
            )));
        }
        self.units.push(unit);
        Ok(())
    }

    pub fn unit_names(&self) -> Vec<&str> {
        self.units.iter().map(|unit| unit.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn status(&self, line: &str) {
        info!("{}", line);
        if self.config.echo_console {
            println!("{}", line);
        }
    }

    /// Run every registered unit once and return the resulting suite.
    pub fn run(&mut self) -> TestSuite {
        let budget = Arc::new(OutputBudget::new(self.config.output_budget));
        let mut suite = TestSuite::new(self.suite_name.clone());

        for unit in &self.units {
            let case = self.run_unit(unit, &suite, &budget);
            if let Err(e) = suite.record(case) {
                // Names are unique at registration, so this cannot happen.
                error!("dropping case: {}", e);
            }
        }

        self.status(&suite.summary_line());
        self.last_suite = Some(suite.clone());
        suite
    }

    fn run_unit(
        &self,
        unit: &Arc<dyn TestUnit>,
        suite: &TestSuite,
        budget: &Arc<OutputBudget>,
    ) -> TestCase {
        let name = unit.name();
        budget.set_enabled(false);

        if let Some(reason) =
            unmet_requirements(unit.descriptor().requirements(), |req| suite.outcome_of(req))
        {
            self.status(&format!("Skipping test {}: {}", name, reason));
            return TestCase::skipped(name, reason);
        }

        let capture = CaseCapture::new(Arc::clone(budget), &self.config);
        let ctx = TestContext::new(name, capture.clone(), Arc::clone(&self.config));
        let banner = format!("Running test {}", name);
        info!("{}", banner);
        capture.record(Channel::Tester, &banner);

        budget.reset();
        budget.set_enabled(true);
        let started = Instant::now();
        let outcome = match unit.descriptor().timeout_limit() {
            Some(limit) => {
                TimeoutGuard::new(limit, self.config.cancel_grace()).run(Arc::clone(unit), &ctx)
            }
            None => run_caught(unit.as_ref(), &ctx),
        };
        let duration = started.elapsed();
        budget.set_enabled(false);

        let omitted = budget.omitted();
        if omitted > 0 {
            capture.log(format!("... {} more characters of output omitted", omitted));
        }

        let (result, message) = classify(&outcome);
        if result != Outcome::Success && !matches!(outcome, RunOutcome::TimedOut(_)) {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| unit.on_failure(&ctx))) {
                warn!("on_failure of '{}' panicked: {}", name, panic_message(payload));
            }
        }
        ctx.processes().cleanup_all();

        if !message.is_empty() {
            capture.log(&message);
        }
        let verdict = format!(
            "Test {}: {} ({:.2}s)",
            name,
            result,
            duration.as_secs_f64()
        );
        if result == Outcome::Error {
            error!("{}: {}", verdict, message);
            if self.config.echo_console {
                println!("{}", verdict);
            }
        } else {
            self.status(&verdict);
        }

        TestCase::new(name, result, duration, message, capture.snapshot())
    }

    /// Suite of the most recent run
    pub fn last_suite(&self) -> Option<&TestSuite> {
        self.last_suite.as_ref()
    }

    /// Write the most recent suite as a JUnit XML report.
    pub fn export<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let suite = self.last_suite.as_ref().ok_or_else(|| {
            HarnessError::Report("nothing to export: the suite has not been run".to_string())
        })?;
        JunitReport::new(suite)
            .text_cap(self.config.report_text_cap)
            .write_to(path)
    }
}
