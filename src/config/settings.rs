/// Harness tunables, loaded from JSON
use crate::config::types::{HarnessError, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables for one harness instance.
///
/// Every field has a default, so a config file only needs to name the
/// values it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Time a process must stay exited before it counts as terminated.
    /// Output flushed just before death is still drained during this window.
    pub termination_grace_ms: u64,
    /// Wake-up interval for blocking reads and termination polling
    pub poll_interval_ms: u64,
    /// How long a timed-out check may take to unwind after cancellation
    pub cancel_grace_ms: u64,
    /// Pause between SIGTERM and SIGKILL when terminating a process group
    pub kill_escalation_ms: u64,
    /// Console output quota per check, in characters (`None` = unlimited)
    pub output_budget: Option<usize>,
    /// In-memory cap per captured stream of one check, in characters
    pub capture_limit: usize,
    /// Cap applied to each captured text field in the exported report
    pub report_text_cap: usize,
    /// Directory for raw per-stream capture files
    pub capture_dir: Option<PathBuf>,
    /// Mirror captured lines to the console
    pub echo_console: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            termination_grace_ms: 500,
            poll_interval_ms: 50,
            cancel_grace_ms: 2000,
            kill_escalation_ms: 200,
            output_budget: Some(20_000),
            capture_limit: 1_000_000,
            report_text_cap: 10_000,
            capture_dir: None,
            echo_console: true,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a JSON file and validate it
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: HarnessConfig = serde_json::from_str(&content)
            .map_err(|e| HarnessError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the harness cannot operate with; warn on odd ones.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.poll_interval_ms == 0 {
            errors.push("poll_interval_ms cannot be zero".to_string());
        }
        if self.report_text_cap == 0 {
            errors.push("report_text_cap cannot be zero".to_string());
        }
        if self.capture_limit == 0 {
            errors.push("capture_limit cannot be zero".to_string());
        }
        if self.output_budget == Some(0) {
            errors.push("output_budget cannot be zero (omit it for unlimited)".to_string());
        }

        if self.termination_grace_ms > 5_000 {
            warn!(
                "termination_grace_ms {} is large; every check waits this long after exit",
                self.termination_grace_ms
            );
        }
        if let Some(dir) = &self.capture_dir {
            if dir.exists() && !dir.is_dir() {
                errors.push(format!("capture_dir {} is not a directory", dir.display()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Config(format!(
                "Config validation failed:\n{}",
                errors.join("\n")
            )))
        }
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn kill_escalation(&self) -> Duration {
        Duration::from_millis(self.kill_escalation_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = HarnessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.termination_grace(), Duration::from_millis(500));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "termination_grace_ms": 250, "output_budget": null }}"#).unwrap();

        let config = HarnessConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.termination_grace_ms, 250);
        assert_eq!(config.output_budget, None);
        assert_eq!(config.poll_interval_ms, 50);
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let config = HarnessConfig {
            poll_interval_ms: 0,
            ..HarnessConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn malformed_json_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            HarnessConfig::load_from_file(file.path()),
            Err(HarnessError::Config(_))
        ));
    }
}
