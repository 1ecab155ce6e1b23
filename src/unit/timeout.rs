/// Wall-clock deadline around a unit's `run`
///
/// The unit runs on a worker thread and its result races a timer. If the
/// timer wins, `on_timeout` is called once and the late result, if any, is
/// discarded. Cancellation is cooperative: the context stops accepting new
/// processes and `on_timeout` kills the existing ones so that blocked reads
/// return.
use crate::unit::{TestContext, TestUnit, UnitError};
use crossbeam_channel::RecvTimeoutError;
use log::{error, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How one invocation of `run` ended
#[derive(Debug)]
pub enum RunOutcome {
    Completed(Result<(), UnitError>),
    Panicked(String),
    TimedOut(Duration),
}

pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Run `unit` on the current thread, converting a panic into an outcome.
pub fn run_caught(unit: &dyn TestUnit, ctx: &TestContext) -> RunOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| unit.run(ctx))) {
        Ok(result) => RunOutcome::Completed(result),
        Err(payload) => RunOutcome::Panicked(panic_message(payload)),
    }
}

/// Deadline wrapper for one unit invocation
#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    limit: Duration,
    cancel_grace: Duration,
}

impl TimeoutGuard {
    /// `cancel_grace` bounds how long a cancelled unit may take to unwind
    /// before the guard stops waiting for it.
    pub fn new(limit: Duration, cancel_grace: Duration) -> Self {
        TimeoutGuard {
            limit,
            cancel_grace,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn run(&self, unit: Arc<dyn TestUnit>, ctx: &TestContext) -> RunOutcome {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let worker_unit = Arc::clone(&unit);
        let worker_ctx = ctx.clone();

        let spawned = thread::Builder::new()
            .name(format!("unit-{}", unit.name()))
            .spawn(move || {
                let outcome = run_caught(worker_unit.as_ref(), &worker_ctx);
                // The receiver is gone if the deadline already passed.
                let _ = tx.send(outcome);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("could not start worker for '{}': {}", unit.name(), e);
                return RunOutcome::Completed(Err(UnitError::Internal(anyhow::anyhow!(
                    "could not start worker thread: {}",
                    e
                ))));
            }
        };

        match rx.recv_timeout(self.limit) {
            Ok(outcome) => {
                let _ = handle.join();
                outcome
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("'{}' exceeded its timeout of {:?}", unit.name(), self.limit);
                // A worker that keeps going must not start anything new.
                ctx.processes().close();
                if let Err(payload) =
                    panic::catch_unwind(AssertUnwindSafe(|| unit.on_timeout(ctx)))
                {
                    error!(
                        "on_timeout of '{}' panicked: {}",
                        unit.name(),
                        panic_message(payload)
                    );
                }
                match rx.recv_timeout(self.cancel_grace) {
                    Ok(_) | Err(RecvTimeoutError::Disconnected) => {
                        let _ = handle.join();
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        warn!(
                            "'{}' did not stop within {:?} after cancellation; detaching it",
                            unit.name(),
                            self.cancel_grace
                        );
                    }
                }
                RunOutcome::TimedOut(self.limit)
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                RunOutcome::Panicked("worker exited without reporting a result".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::HarnessConfig;
    use crate::unit::{fail, UnitDescriptor};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    struct Sleeper {
        descriptor: UnitDescriptor,
        sleep: Duration,
        cancelled: AtomicBool,
        timeouts: AtomicUsize,
    }

    impl Sleeper {
        fn new(sleep: Duration) -> Self {
            Sleeper {
                descriptor: UnitDescriptor::new("sleeper"),
                sleep,
                cancelled: AtomicBool::new(false),
                timeouts: AtomicUsize::new(0),
            }
        }
    }

    impl TestUnit for Sleeper {
        fn descriptor(&self) -> &UnitDescriptor {
            &self.descriptor
        }

        fn run(&self, _ctx: &TestContext) -> Result<(), UnitError> {
            let start = Instant::now();
            while start.elapsed() < self.sleep {
                if self.cancelled.load(Ordering::SeqCst) {
                    return fail("cancelled");
                }
                thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }

        fn on_timeout(&self, _ctx: &TestContext) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    fn ctx() -> TestContext {
        TestContext::detached("sleeper", HarnessConfig::default())
    }

    #[test]
    fn fast_unit_completes() {
        let unit = Arc::new(Sleeper::new(Duration::from_millis(10)));
        let guard = TimeoutGuard::new(Duration::from_secs(5), Duration::from_secs(1));
        let outcome = guard.run(unit.clone(), &ctx());
        assert!(matches!(outcome, RunOutcome::Completed(Ok(()))));
        assert_eq!(unit.timeouts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn slow_unit_times_out_once() {
        let unit = Arc::new(Sleeper::new(Duration::from_secs(30)));
        let guard = TimeoutGuard::new(Duration::from_millis(100), Duration::from_secs(1));

        let start = Instant::now();
        let outcome = guard.run(unit.clone(), &ctx());
        assert!(matches!(outcome, RunOutcome::TimedOut(_)));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(unit.timeouts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timeout_closes_the_process_slot() {
        let unit = Arc::new(Sleeper::new(Duration::from_secs(30)));
        let guard = TimeoutGuard::new(Duration::from_millis(50), Duration::from_secs(1));
        let ctx = ctx();
        assert!(matches!(guard.run(unit, &ctx), RunOutcome::TimedOut(_)));
        assert!(ctx.processes().is_closed());
    }

    #[test]
    fn panics_become_outcomes() {
        struct Boom(UnitDescriptor);
        impl TestUnit for Boom {
            fn descriptor(&self) -> &UnitDescriptor {
                &self.0
            }
            fn run(&self, _ctx: &TestContext) -> Result<(), UnitError> {
                panic!("kaboom")
            }
        }

        let unit = Boom(UnitDescriptor::new("boom"));
        match run_caught(&unit, &ctx()) {
            RunOutcome::Panicked(msg) => assert_eq!(msg, "kaboom"),
            other => panic!("unexpected {:?}", other),
        }

        let guard = TimeoutGuard::new(Duration::from_secs(5), Duration::from_secs(1));
        assert!(matches!(
            guard.run(Arc::new(Boom(UnitDescriptor::new("boom"))), &ctx()),
            RunOutcome::Panicked(_)
        ));
    }
}
