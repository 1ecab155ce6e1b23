/// Per-run console output quota and per-check text capture
use crate::config::settings::HarnessConfig;
use std::borrow::Cow;
use std::sync::{Arc, Mutex, MutexGuard};

/// Console quota shared between the orchestrator and stream readers.
///
/// One budget exists per suite run. The orchestrator resets and enables it
/// before each check and disables it while printing its own status lines.
#[derive(Debug)]
pub struct OutputBudget {
    state: Mutex<BudgetState>,
}

#[derive(Debug)]
struct BudgetState {
    limit: Option<usize>,
    used: usize,
    omitted: usize,
    enabled: bool,
}

impl OutputBudget {
    pub fn new(limit: Option<usize>) -> Self {
        OutputBudget {
            state: Mutex::new(BudgetState {
                limit,
                used: 0,
                omitted: 0,
                enabled: false,
            }),
        }
    }

    /// Budget that never limits anything
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a fresh quota window
    pub fn reset(&self) {
        let mut state = self.lock();
        state.used = 0;
        state.omitted = 0;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    /// Charge `text` against the quota and return the part that may be printed.
    pub fn admit<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut state = self.lock();
        let limit = match (state.enabled, state.limit) {
            (true, Some(limit)) => limit,
            _ => return Cow::Borrowed(text),
        };

        let chars = text.chars().count();
        let remaining = limit.saturating_sub(state.used);
        if chars <= remaining {
            state.used += chars;
            return Cow::Borrowed(text);
        }

        state.used = limit;
        state.omitted += chars - remaining;
        Cow::Owned(text.chars().take(remaining).collect())
    }

    /// Characters dropped since the last reset
    pub fn omitted(&self) -> usize {
        self.lock().omitted
    }
}

/// Destination of a captured line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Stdout,
    Stderr,
    /// Messages written by the harness or the check itself
    Tester,
}

impl Channel {
    fn prefix(self) -> &'static str {
        match self {
            Channel::Stdout => "",
            Channel::Stderr => "[stderr] ",
            Channel::Tester => "[tester] ",
        }
    }
}

/// Text captured for one check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedText {
    pub stdout: String,
    pub stderr: String,
    pub tester: String,
}

#[derive(Debug, Default)]
struct CaptureBuffers {
    text: CapturedText,
    /// Characters held per channel
    used: [usize; 3],
    dropped: [usize; 3],
}

#[derive(Debug)]
struct CaptureInner {
    budget: Arc<OutputBudget>,
    echo: bool,
    limit: usize,
    buffers: Mutex<CaptureBuffers>,
}

/// Capture sink for one check: stores stdout, stderr and tester text and
/// mirrors lines to the console through the run's [`OutputBudget`].
///
/// Cheap to clone; clones share the same buffers.
#[derive(Debug, Clone)]
pub struct CaseCapture {
    inner: Arc<CaptureInner>,
}

impl CaseCapture {
    pub fn new(budget: Arc<OutputBudget>, config: &HarnessConfig) -> Self {
        CaseCapture {
            inner: Arc::new(CaptureInner {
                budget,
                echo: config.echo_console,
                limit: config.capture_limit,
                buffers: Mutex::new(CaptureBuffers::default()),
            }),
        }
    }

    /// Capture that is not tied to a suite run and never echoes.
    pub fn detached() -> Self {
        CaseCapture {
            inner: Arc::new(CaptureInner {
                budget: Arc::new(OutputBudget::unlimited()),
                echo: false,
                limit: HarnessConfig::default().capture_limit,
                buffers: Mutex::new(CaptureBuffers::default()),
            }),
        }
    }

    /// Record one line (without trailing newline).
    pub fn record(&self, channel: Channel, line: &str) {
        {
            let mut buffers = self
                .inner
                .buffers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let limit = self.inner.limit;
            let CaptureBuffers {
                text,
                used,
                dropped,
            } = &mut *buffers;
            let (slot, index) = match channel {
                Channel::Stdout => (&mut text.stdout, 0),
                Channel::Stderr => (&mut text.stderr, 1),
                Channel::Tester => (&mut text.tester, 2),
            };
            let incoming = line.chars().count() + 1;
            if used[index] + incoming <= limit {
                slot.push_str(line);
                slot.push('\n');
                used[index] += incoming;
            } else {
                let room = limit.saturating_sub(used[index]);
                slot.extend(line.chars().take(room));
                used[index] += room.min(incoming);
                dropped[index] += incoming - room.min(incoming);
            }
        }

        if self.inner.echo {
            let admitted = self.inner.budget.admit(line);
            if !admitted.is_empty() {
                println!("{}{}", channel.prefix(), admitted);
            }
        }
    }

    /// Record a tester message
    pub fn log(&self, message: impl AsRef<str>) {
        for line in message.as_ref().lines() {
            self.record(Channel::Tester, line);
        }
    }

    /// Copy of everything captured so far, with in-memory truncation noted.
    pub fn snapshot(&self) -> CapturedText {
        let buffers = self
            .inner
            .buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut text = buffers.text.clone();
        for (slot, dropped) in [
            (&mut text.stdout, buffers.dropped[0]),
            (&mut text.stderr, buffers.dropped[1]),
            (&mut text.tester, buffers.dropped[2]),
        ] {
            if dropped > 0 {
                slot.push_str(&format!("\n[{} more characters not captured]\n", dropped));
            }
        }
        text
    }

    pub fn budget(&self) -> &Arc<OutputBudget> {
        &self.inner.budget
    }
}
