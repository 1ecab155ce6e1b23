//! Generic checks and the JSON manifest that declares them
//!
//! Exercise-independent [`TestUnit`] implementations: [`CommandCheck`] runs a
//! command to completion, [`ScriptedCheck`] drives an interactive program and
//! [`ClosureCheck`] wraps arbitrary code. A [`CheckManifest`] lists checks
//! for the command-line driver.

pub mod closure;
pub mod command;
pub mod scripted;

pub use closure::ClosureCheck;
pub use command::CommandCheck;
pub use scripted::{ScriptedCheck, Step};

use crate::config::types::{HarnessError, Result};
use crate::process::{ProcessSpec, SupervisedProcess};
use crate::unit::{TestUnit, UnitDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

/// Block until `process` has terminated, then return its exit status.
///
/// Bounded by the unit's timeout: a timed-out unit's processes are killed,
/// which ends the wait.
pub(crate) fn await_exit(process: &SupervisedProcess) -> Option<ExitStatus> {
    while !process.wait_until_termination_reading(Duration::from_secs(1)) {}
    process.exit_status()
}

pub(crate) fn describe_status(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => match (status.code(), status.signal()) {
            (Some(code), _) => format!("exited with code {}", code),
            (None, Some(sig)) => format!("was killed by signal {}", sig),
            (None, None) => "exited abnormally".to_string(),
        },
        None => "did not exit".to_string(),
    }
}

fn default_suite_name() -> String {
    "gradebox".to_string()
}

/// What kind of check a manifest entry declares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckKind {
    Command {
        process: ProcessSpec,
        #[serde(default)]
        expect_exit: i32,
    },
    Scripted {
        process: ProcessSpec,
        steps: Vec<Step>,
    },
}

/// One manifest entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSpec {
    pub name: String,
    #[serde(default)]
    pub requires: Vec<String>,
    /// Seconds; absent, zero or negative means no timeout
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    #[serde(flatten)]
    pub kind: CheckKind,
}

impl CheckSpec {
    pub fn descriptor(&self) -> UnitDescriptor {
        UnitDescriptor::new(self.name.clone())
            .requires(self.requires.iter().cloned())
            .timeout_secs(self.timeout_secs.unwrap_or(0.0))
    }

    pub fn into_unit(self) -> Arc<dyn TestUnit> {
        let descriptor = self.descriptor();
        match self.kind {
            CheckKind::Command {
                process,
                expect_exit,
            } => Arc::new(CommandCheck::new(descriptor, process).expect_exit(expect_exit)),
            CheckKind::Scripted { process, steps } => {
                Arc::new(ScriptedCheck::new(descriptor, process).steps(steps))
            }
        }
    }
}

/// Ordered list of checks making up one suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckManifest {
    #[serde(default = "default_suite_name")]
    pub suite: String,
    pub checks: Vec<CheckSpec>,
}

impl CheckManifest {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("Failed to read manifest {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let manifest: CheckManifest = serde_json::from_str(content)
            .map_err(|e| HarnessError::Config(format!("Failed to parse manifest JSON: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Names must be unique and non-empty, commands non-empty and
    /// patterns valid. Requirements on unknown names are allowed; such
    /// checks are skipped at run time.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for check in &self.checks {
            if check.name.is_empty() {
                errors.push("check name cannot be empty".to_string());
            } else if !seen.insert(check.name.as_str()) {
                errors.push(format!("duplicate check name '{}'", check.name));
            }

            let (process, steps) = match &check.kind {
                CheckKind::Command { process, .. } => (process, &[][..]),
                CheckKind::Scripted { process, steps } => (process, steps.as_slice()),
            };
            if process.command.is_empty() {
                errors.push(format!("check '{}' has an empty command", check.name));
            }
            for step in steps {
                if let Err(e) = step.validate() {
                    errors.push(format!("check '{}': {}", check.name, e));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Config(format!(
                "Manifest validation failed:\n{}",
                errors.join("\n")
            )))
        }
    }

    pub fn into_units(self) -> Vec<Arc<dyn TestUnit>> {
        self.checks.into_iter().map(CheckSpec::into_unit).collect()
    }
}
