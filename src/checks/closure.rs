/// Check backed by a closure
use crate::unit::{TestContext, TestUnit, UnitDescriptor, UnitError};
use std::fmt;

type CheckFn = dyn Fn(&TestContext) -> Result<(), UnitError> + Send + Sync;

/// Lets exercise-specific drivers register ad-hoc checks without declaring
/// a type per check.
pub struct ClosureCheck {
    descriptor: UnitDescriptor,
    body: Box<CheckFn>,
}

impl ClosureCheck {
    pub fn new<F>(descriptor: UnitDescriptor, body: F) -> Self
    where
        F: Fn(&TestContext) -> Result<(), UnitError> + Send + Sync + 'static,
    {
        ClosureCheck {
            descriptor,
            body: Box::new(body),
        }
    }
}

impl fmt::Debug for ClosureCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureCheck")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl TestUnit for ClosureCheck {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn run(&self, ctx: &TestContext) -> Result<(), UnitError> {
        (self.body)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::HarnessConfig;
    use crate::unit::fail;

    #[test]
    fn closure_result_is_returned() {
        let ctx = TestContext::detached("c", HarnessConfig::default());
        let ok = ClosureCheck::new(UnitDescriptor::new("ok"), |ctx| {
            ctx.log("fine");
            Ok(())
        });
        ok.run(&ctx).unwrap();
        assert_eq!(ok.name(), "ok");

        let bad = ClosureCheck::new(UnitDescriptor::new("bad"), |_| fail("nope"));
        assert!(matches!(bad.run(&ctx), Err(UnitError::Failed(msg)) if msg == "nope"));
    }
}
