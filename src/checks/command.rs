/// Run a command to completion and require an exit code
use crate::checks::{await_exit, describe_status};
use crate::process::ProcessSpec;
use crate::unit::{fail, TestContext, TestUnit, UnitDescriptor, UnitError};

/// Typical use is a build step that later checks depend on.
#[derive(Debug, Clone)]
pub struct CommandCheck {
    descriptor: UnitDescriptor,
    spec: ProcessSpec,
    expect_exit: i32,
}

impl CommandCheck {
    pub fn new(descriptor: UnitDescriptor, spec: ProcessSpec) -> Self {
        CommandCheck {
            descriptor,
            spec,
            expect_exit: 0,
        }
    }

    pub fn expect_exit(mut self, code: i32) -> Self {
        self.expect_exit = code;
        self
    }
}

impl TestUnit for CommandCheck {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn run(&self, ctx: &TestContext) -> Result<(), UnitError> {
        let process = ctx.spawn(&self.spec)?;
        process.close_stdin()?;

        let status = await_exit(&process);
        match status.and_then(|status| status.code()) {
            Some(code) if code == self.expect_exit => Ok(()),
            _ => fail(format!(
                "'{}' {} (expected exit code {})",
                self.spec.command.join(" "),
                describe_status(status),
                self.expect_exit
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::HarnessConfig;

    fn ctx() -> TestContext {
        TestContext::detached(
            "command",
            HarnessConfig {
                termination_grace_ms: 50,
                echo_console: false,
                ..HarnessConfig::default()
            },
        )
    }

    #[test]
    fn matching_exit_code_passes() {
        let check = CommandCheck::new(
            UnitDescriptor::new("true"),
            ProcessSpec::new(["/bin/sh", "-c", "echo built"]),
        );
        let ctx = ctx();
        check.run(&ctx).unwrap();
        ctx.processes().cleanup_all();
        assert!(ctx.capture().snapshot().stdout.contains("built"));
    }

    #[test]
    fn wrong_exit_code_fails_with_details() {
        let check = CommandCheck::new(
            UnitDescriptor::new("exit3"),
            ProcessSpec::new(["/bin/sh", "-c", "exit 3"]),
        );
        let ctx = ctx();
        match check.run(&ctx) {
            Err(UnitError::Failed(msg)) => {
                assert!(msg.contains("exited with code 3"), "{}", msg);
                assert!(msg.contains("expected exit code 0"));
            }
            other => panic!("unexpected {:?}", other),
        }
        ctx.processes().cleanup_all();

        let check = CommandCheck::new(
            UnitDescriptor::new("exit3"),
            ProcessSpec::new(["/bin/sh", "-c", "exit 3"]),
        )
        .expect_exit(3);
        let ctx = self::ctx();
        check.run(&ctx).unwrap();
        ctx.processes().cleanup_all();
    }

    #[test]
    fn missing_program_is_an_environment_error() {
        let check = CommandCheck::new(
            UnitDescriptor::new("missing"),
            ProcessSpec::new(["/definitely/not/here"]),
        );
        assert!(matches!(
            check.run(&ctx()),
            Err(UnitError::Environment(err)) if err.is_environment()
        ));
    }
}
