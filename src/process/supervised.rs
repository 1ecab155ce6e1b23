/// Supervised subject process with pty-backed standard streams
///
/// The child gets a terminal on stdin, stdout and stderr so it line-buffers
/// and can be driven interactively, while every byte it prints is captured.
/// All methods take `&self`: a timeout may kill the process from another
/// thread while the check is blocked reading from it.
use crate::config::settings::HarnessConfig;
use crate::config::types::{HarnessError, Result, SpawnFailure, Stream};
use crate::process::credentials;
use crate::process::pty::{self, PtyRole};
use crate::process::reader::{LineBuffer, StreamReader};
use crate::process::signal::{self, KillReport};
use crate::scheduler::budget::{CaseCapture, Channel};
use log::{debug, info, warn};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// End-of-file character for a canonical-mode terminal (Ctrl-D)
const VEOF: u8 = 0x04;

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

/// What to run and how
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessSpec {
    /// Program and arguments
    pub command: Vec<String>,
    /// Working directory of the child
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Run as this OS user (caller must be root)
    #[serde(default)]
    pub user: Option<String>,
    /// Name used for raw capture files and log lines
    #[serde(default)]
    pub label: Option<String>,
}

impl ProcessSpec {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProcessSpec {
            command: command.into_iter().map(Into::into).collect(),
            workdir: default_workdir(),
            env: BTreeMap::new(),
            user: None,
            label: None,
        }
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = dir.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label, falling back to the program's file name
    pub fn display_label(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        self.command
            .first()
            .map(|program| {
                Path::new(program)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| program.clone())
            })
            .unwrap_or_else(|| "process".to_string())
    }
}

#[derive(Debug)]
struct ChildState {
    child: Child,
    first_exit: Option<Instant>,
    status: Option<ExitStatus>,
}

impl ChildState {
    fn record(&mut self, status: ExitStatus) {
        if self.status.is_none() {
            self.status = Some(status);
            self.first_exit = Some(Instant::now());
        }
    }
}

/// One running subject program
#[derive(Debug)]
pub struct SupervisedProcess {
    label: String,
    command: Vec<String>,
    pgid: Pid,
    child: Mutex<ChildState>,
    stdin: Mutex<Option<File>>,
    stdout_lines: Arc<LineBuffer>,
    stderr_lines: Arc<LineBuffer>,
    readers: Mutex<Vec<StreamReader>>,
    active_readers: Arc<AtomicUsize>,
    raw_paths: Option<(PathBuf, PathBuf)>,
    capture: CaseCapture,
    grace: Duration,
    poll: Duration,
    escalation: Duration,
    cleaned: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// File-name-safe form of a process label
fn capture_stem(label: &str) -> String {
    let stem: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "process".to_string()
    } else if stem.starts_with('.') {
        format!("_{}", stem)
    } else {
        stem
    }
}

/// Create a fresh pair of raw capture files in `dir`. An existing pair with
/// the same stem is left alone and a numbered suffix is tried instead.
fn open_raw_pair(dir: &Path, label: &str) -> Result<((PathBuf, PathBuf), (File, File))> {
    const MAX_SUFFIX: usize = 10_000;

    std::fs::create_dir_all(dir)?;
    let stem = capture_stem(label);
    for n in 1..=MAX_SUFFIX {
        let name = if n == 1 {
            stem.clone()
        } else {
            format!("{}-{}", stem, n)
        };
        let out_path = dir.join(format!("{}.stdout.raw", name));
        let out = match OpenOptions::new().write(true).create_new(true).open(&out_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        };
        let err_path = dir.join(format!("{}.stderr.raw", name));
        let err = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&err_path)?;
        return Ok(((out_path, err_path), (out, err)));
    }
    Err(HarnessError::Config(format!(
        "no free raw capture name for '{}' in {}",
        label,
        dir.display()
    )))
}

fn check_workdir(spec: &ProcessSpec) -> Result<()> {
    let command = spec.command.join(" ");
    match std::fs::metadata(&spec.workdir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(HarnessError::Spawn {
            command,
            failure: SpawnFailure::NotADirectory,
            source: io::Error::from_raw_os_error(libc::ENOTDIR),
        }),
        Err(e) => Err(HarnessError::Spawn {
            command,
            failure: SpawnFailure::classify(&e),
            source: io::Error::new(
                e.kind(),
                format!("working directory {}: {}", spec.workdir.display(), e),
            ),
        }),
    }
}

impl SupervisedProcess {
    /// Spawn `spec` in its own process group with pty-backed streams and
    /// start one reader per output stream.
    pub fn start(spec: &ProcessSpec, config: &HarnessConfig, capture: CaseCapture) -> Result<Self> {
        let program = spec
            .command
            .first()
            .ok_or_else(|| HarnessError::Config("empty command".to_string()))?;

        // Refuse demotion before anything is allocated.
        let creds = spec
            .user
            .as_deref()
            .map(credentials::resolve)
            .transpose()?;
        check_workdir(spec)?;

        let label = spec.display_label();
        let stdin_pty = pty::allocate(PtyRole::Input)?;
        let stdout_pty = pty::allocate(PtyRole::Output)?;
        let stderr_pty = pty::allocate(PtyRole::Output)?;

        let (raw_paths, raw_stdout, raw_stderr) = match &config.capture_dir {
            Some(dir) => {
                let (paths, (out, err)) = open_raw_pair(dir, &label)?;
                (Some(paths), Some(out), Some(err))
            }
            None => (None, None, None),
        };

        let child = {
            let mut command = Command::new(program);
            command
                .args(&spec.command[1..])
                .current_dir(&spec.workdir)
                .stdin(Stdio::from(stdin_pty.slave))
                .stdout(Stdio::from(stdout_pty.slave))
                .stderr(Stdio::from(stderr_pty.slave))
                .process_group(0);
            for (key, value) in &spec.env {
                command.env(key, value);
            }
            if let Some(creds) = creds {
                credentials::apply(&mut command, creds);
            }
            // `command` owns our copies of the slave ends; they close when it
            // drops at the end of this block so readers see EIO once the
            // child side is gone.
            command.spawn().map_err(|e| HarnessError::Spawn {
                command: spec.command.join(" "),
                failure: SpawnFailure::classify(&e),
                source: e,
            })?
        };

        let pgid = Pid::from_raw(child.id() as i32);
        info!("started '{}' (pid {}): {:?}", label, pgid, spec.command);

        let active_readers = Arc::new(AtomicUsize::new(0));
        let mut readers = Vec::with_capacity(2);
        let mut spawn_failure = None;
        for (stream, master, raw) in [
            (Stream::Stdout, stdout_pty.master, raw_stdout),
            (Stream::Stderr, stderr_pty.master, raw_stderr),
        ] {
            match StreamReader::spawn(
                stream,
                File::from(master),
                raw,
                capture.clone(),
                Arc::clone(&active_readers),
            ) {
                Ok(reader) => readers.push(reader),
                Err(e) => {
                    spawn_failure = Some(e);
                    break;
                }
            }
        }

        let (stdout_lines, stderr_lines) = match (readers.first(), readers.get(1)) {
            (Some(out), Some(err)) => (Arc::clone(out.lines()), Arc::clone(err.lines())),
            _ => (Arc::new(LineBuffer::new()), Arc::new(LineBuffer::new())),
        };

        let process = SupervisedProcess {
            label,
            command: spec.command.clone(),
            pgid,
            child: Mutex::new(ChildState {
                child,
                first_exit: None,
                status: None,
            }),
            stdin: Mutex::new(Some(File::from(stdin_pty.master))),
            stdout_lines,
            stderr_lines,
            readers: Mutex::new(readers),
            active_readers,
            raw_paths,
            capture,
            grace: config.termination_grace(),
            poll: config.poll_interval(),
            escalation: config.kill_escalation(),
            cleaned: AtomicBool::new(false),
        };

        if let Some(e) = spawn_failure {
            process.cleanup();
            return Err(HarnessError::Process(format!(
                "failed to start stream reader: {}",
                e
            )));
        }
        Ok(process)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Process id of the child, which is also its process group id
    pub fn pid(&self) -> i32 {
        self.pgid.as_raw()
    }

    /// Raw capture file paths (stdout, stderr), when enabled
    pub fn raw_capture_paths(&self) -> Option<(&Path, &Path)> {
        self.raw_paths
            .as_ref()
            .map(|(out, err)| (out.as_path(), err.as_path()))
    }

    fn lines(&self, stream: Stream) -> &Arc<LineBuffer> {
        match stream {
            Stream::Stdout => &self.stdout_lines,
            Stream::Stderr => &self.stderr_lines,
        }
    }

    /// Check for exit without blocking; returns when exit was first seen.
    fn observe_exit(&self) -> Option<Instant> {
        let mut state = lock(&self.child);
        if state.status.is_none() {
            match state.child.try_wait() {
                Ok(Some(status)) => {
                    debug!("'{}' exited: {}", self.label, status);
                    state.record(status);
                }
                Ok(None) => {}
                Err(e) => warn!("try_wait on '{}' failed: {}", self.label, e),
            }
        }
        state.first_exit
    }

    /// True once the exit status has been observed and the grace period
    /// since that first observation has elapsed.
    pub fn has_terminated(&self) -> bool {
        self.observe_exit()
            .map_or(false, |first| first.elapsed() >= self.grace)
    }

    /// Exit status, if the process has exited
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.observe_exit();
        lock(&self.child).status
    }

    /// Exit code, if the process exited normally
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status().and_then(|status| status.code())
    }

    /// Pop the oldest buffered line of `stream`.
    ///
    /// Non-blocking calls return an empty string when nothing is buffered.
    /// Blocking calls wait for a line but give up with an empty string once
    /// the stream is closed or the process has terminated.
    pub fn read_line(&self, stream: Stream, blocking: bool) -> String {
        if blocking {
            self.next_line(stream).unwrap_or_default()
        } else {
            self.lines(stream).pop().unwrap_or_default()
        }
    }

    /// Blocking read that tells an empty line apart from the end of output:
    /// `None` once the stream is closed or the process has terminated and
    /// nothing is left.
    pub fn next_line(&self, stream: Stream) -> Option<String> {
        let lines = self.lines(stream);
        loop {
            if let Some(line) = lines.pop() {
                return Some(line);
            }
            if lines.is_closed() || self.has_terminated() {
                return lines.pop();
            }
            lines.wait(self.poll);
        }
    }

    /// Non-blocking peek
    pub fn can_read_line(&self, stream: Stream) -> bool {
        self.lines(stream).has_line()
    }

    /// Write `data` to the child's stdin terminal.
    pub fn write_stdin(&self, data: &str) -> Result<()> {
        let mut stdin = lock(&self.stdin);
        let file = stdin.as_mut().ok_or_else(|| {
            HarnessError::Process(format!("stdin of '{}' is already released", self.label))
        })?;
        file.write_all(data.as_bytes())?;
        file.flush()?;

        debug!("'{}' stdin <- {:?}", self.label, data);
        for line in data.lines() {
            self.capture.record(Channel::Tester, &format!("$ stdin: {}", line));
        }
        Ok(())
    }

    /// Write `line` followed by a newline
    pub fn write_line(&self, line: &str) -> Result<()> {
        self.write_stdin(&format!("{}\n", line))
    }

    /// Signal end-of-input to the child.
    pub fn close_stdin(&self) -> Result<()> {
        let mut stdin = lock(&self.stdin);
        if let Some(file) = stdin.as_mut() {
            file.write_all(&[VEOF])?;
            file.flush()?;
            self.capture.record(Channel::Tester, "$ stdin: <EOF>");
        }
        Ok(())
    }

    /// Poll until the process terminated or `timeout` passed, discarding
    /// stdout lines meanwhile. Returns true if it terminated.
    pub fn wait_until_termination_reading(&self, timeout: Duration) -> bool {
        self.poll_until(timeout, true)
    }

    /// Like [`Self::wait_until_termination_reading`] but leaves buffered lines alone.
    pub fn wait_for_exit(&self, timeout: Duration) -> bool {
        self.poll_until(timeout, false)
    }

    fn poll_until(&self, timeout: Duration, drain: bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if drain {
                self.stdout_lines.drain();
            }
            if self.has_terminated() {
                if drain {
                    self.stdout_lines.drain();
                }
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(self.poll.min(deadline - now));
        }
    }

    /// Send `sig` to the process group. Returns whether anything was there
    /// to receive it.
    pub fn kill(&self, sig: Signal) -> bool {
        match signal::signal_group(self.pgid, sig) {
            Ok(delivered) => {
                if delivered {
                    info!("sent {:?} to '{}' (group {})", sig, self.label, self.pgid);
                }
                delivered
            }
            Err(e) => {
                warn!("failed to signal group of '{}': {}", self.label, e);
                false
            }
        }
    }

    /// SIGTERM, wait, then SIGKILL the whole group
    pub fn terminate(&self) -> KillReport {
        signal::terminate_group(self.pgid, self.escalation)
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }

    /// Reader threads still running
    pub fn active_readers(&self) -> usize {
        self.active_readers.load(Ordering::SeqCst)
    }

    /// Kill what is left of the group, reap the child, stop and join both
    /// readers and release the stdin terminal. Safe to call repeatedly and
    /// from any thread; only the first call does work.
    pub fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }

        self.kill(Signal::SIGKILL);
        {
            let mut state = lock(&self.child);
            if state.status.is_none() {
                // The child may have left our group; hit it directly too.
                let _ = state.child.kill();
                match state.child.wait() {
                    Ok(status) => state.record(status),
                    Err(e) => warn!("reaping '{}' failed: {}", self.label, e),
                }
            }
        }

        let readers = std::mem::take(&mut *lock(&self.readers));
        for mut reader in readers {
            reader.stop_and_join();
        }
        lock(&self.stdin).take();

        debug!(
            "cleaned up '{}' (pid {}), {} reader(s) still active",
            self.label,
            self.pgid,
            self.active_readers()
        );
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        if !self.is_cleaned_up() {
            warn!("'{}' dropped without cleanup; cleaning up now", self.label);
            self.cleanup();
        }
    }
}
