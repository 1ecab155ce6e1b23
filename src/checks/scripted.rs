/// Drive an interactive program through a fixed script
use crate::checks::{await_exit, describe_status};
use crate::config::types::{HarnessError, Stream};
use crate::process::{ProcessSpec, SupervisedProcess};
use crate::unit::{fail, TestContext, TestUnit, UnitDescriptor, UnitError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One scripted interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Write a line to stdin
    Send { line: String },
    /// Next line on `stream` must equal `line` (trailing whitespace ignored)
    Expect {
        line: String,
        #[serde(default)]
        stream: Stream,
    },
    /// Next line on `stream` must match the regular expression
    ExpectMatch {
        pattern: String,
        #[serde(default)]
        stream: Stream,
    },
    /// Program must exit with `code`
    ExpectExit { code: i32 },
    /// Send end-of-input
    CloseStdin,
}

impl Step {
    /// Reject patterns that do not compile.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if let Step::ExpectMatch { pattern, .. } = self {
            compile(pattern)?;
        }
        Ok(())
    }
}

fn compile(pattern: &str) -> Result<Regex, HarnessError> {
    Regex::new(pattern)
        .map_err(|e| HarnessError::Config(format!("invalid pattern {:?}: {}", pattern, e)))
}

#[derive(Debug, Clone)]
pub struct ScriptedCheck {
    descriptor: UnitDescriptor,
    spec: ProcessSpec,
    steps: Vec<Step>,
}

impl ScriptedCheck {
    pub fn new(descriptor: UnitDescriptor, spec: ProcessSpec) -> Self {
        ScriptedCheck {
            descriptor,
            spec,
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps<I: IntoIterator<Item = Step>>(mut self, steps: I) -> Self {
        self.steps.extend(steps);
        self
    }

    fn perform(&self, process: &SupervisedProcess, step: &Step) -> Result<(), UnitError> {
        match step {
            Step::Send { line } => process.write_line(line)?,
            Step::CloseStdin => process.close_stdin()?,
            Step::Expect { line, stream } => {
                let got = next_line(process, *stream, &format!("{:?}", line))?;
                if got.trim_end() != line.trim_end() {
                    return fail(format!(
                        "expected {:?} on {}, got {:?}",
                        line, stream, got
                    ));
                }
            }
            Step::ExpectMatch { pattern, stream } => {
                let regex = compile(pattern)?;
                let got = next_line(process, *stream, &format!("a line matching /{}/", pattern))?;
                if !regex.is_match(&got) {
                    return fail(format!(
                        "expected a line matching /{}/ on {}, got {:?}",
                        pattern, stream, got
                    ));
                }
            }
            Step::ExpectExit { code } => {
                let status = await_exit(process);
                if status.and_then(|status| status.code()) != Some(*code) {
                    return fail(format!(
                        "program {} (expected exit code {})",
                        describe_status(status),
                        code
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Blocking read that turns "no more output" into a failure
fn next_line(process: &SupervisedProcess, stream: Stream, wanted: &str) -> Result<String, UnitError> {
    match process.next_line(stream) {
        Some(line) => Ok(line),
        None => {
            let status = if process.wait_for_exit(Duration::from_secs(1)) {
                describe_status(process.exit_status())
            } else {
                format!("closed its {}", stream)
            };
            fail(format!("program {} before printing {} on {}", status, wanted, stream))
        }
    }
}

impl TestUnit for ScriptedCheck {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn run(&self, ctx: &TestContext) -> Result<(), UnitError> {
        let process = ctx.spawn(&self.spec)?;
        for step in &self.steps {
            self.perform(&process, step)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::HarnessConfig;

    fn ctx() -> TestContext {
        TestContext::detached(
            "scripted",
            HarnessConfig {
                termination_grace_ms: 50,
                echo_console: false,
                ..HarnessConfig::default()
            },
        )
    }

    #[test]
    fn steps_deserialize_from_json() {
        let steps: Vec<Step> = serde_json::from_str(
            r#"[
                {"step": "send", "line": "PING"},
                {"step": "expect", "line": "PING"},
                {"step": "expect_match", "pattern": "^err", "stream": "stderr"},
                {"step": "close_stdin"},
                {"step": "expect_exit", "code": 0}
            ]"#,
        )
        .unwrap();
        assert_eq!(
            steps[1],
            Step::Expect {
                line: "PING".to_string(),
                stream: Stream::Stdout
            }
        );
        assert_eq!(steps[3], Step::CloseStdin);
        assert!(matches!(steps[2], Step::ExpectMatch { stream: Stream::Stderr, .. }));
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let step = Step::ExpectMatch {
            pattern: "(".to_string(),
            stream: Stream::Stdout,
        };
        assert!(matches!(step.validate(), Err(HarnessError::Config(_))));
    }

    #[test]
    fn cat_echoes_script() {
        let check = ScriptedCheck::new(UnitDescriptor::new("cat"), ProcessSpec::new(["cat"])).steps([
            Step::Send {
                line: "PING".to_string(),
            },
            Step::Expect {
                line: "PING".to_string(),
                stream: Stream::Stdout,
            },
            Step::CloseStdin,
            Step::ExpectExit { code: 0 },
        ]);
        let ctx = ctx();
        let result = check.run(&ctx);
        ctx.processes().cleanup_all();
        result.unwrap();
    }

    #[test]
    fn mismatch_reports_both_lines() {
        let check = ScriptedCheck::new(
            UnitDescriptor::new("pong"),
            ProcessSpec::new(["/bin/sh", "-c", "echo PONG; sleep 5"]),
        )
        .step(Step::Expect {
            line: "PING".to_string(),
            stream: Stream::Stdout,
        });
        let ctx = ctx();
        let result = check.run(&ctx);
        ctx.processes().cleanup_all();
        match result {
            Err(UnitError::Failed(msg)) => {
                assert!(msg.contains("\"PING\""));
                assert!(msg.contains("\"PONG\""));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn early_exit_fails_expectation() {
        let check = ScriptedCheck::new(
            UnitDescriptor::new("silent"),
            ProcessSpec::new(["/bin/sh", "-c", "exit 0"]),
        )
        .step(Step::Expect {
            line: "hello".to_string(),
            stream: Stream::Stdout,
        });
        let ctx = ctx();
        let result = check.run(&ctx);
        ctx.processes().cleanup_all();
        match result {
            Err(UnitError::Failed(msg)) => assert!(msg.contains("before printing"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
    }
}
