/// Background stream readers for supervised processes
///
/// One reader thread per output stream drains the pty master, decodes the
/// bytes, appends them to an optional raw capture file, splits them into
/// lines and mirrors each line to the check's capture.
use crate::config::types::Stream;
use crate::scheduler::budget::{CaseCapture, Channel};
use log::{debug, warn};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const READ_CHUNK: usize = 4096;
const IDLE_SLEEP: Duration = Duration::from_millis(5);
/// Chunks still read after a stop request before giving up on a writer
/// that never pauses
const MAX_READS_AFTER_STOP: usize = 64;

/// Incremental UTF-8 decoder with a Latin-1 fallback.
///
/// Sequences split across reads are held back until complete. A chunk
/// containing invalid UTF-8 is decoded byte-for-byte as Latin-1.
#[derive(Debug, Default)]
pub struct Decoder {
    pending: Vec<u8>,
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let decoded = std::str::from_utf8(&self.pending).map(str::to_owned);
        match decoded {
            Ok(out) => {
                self.pending.clear();
                out
            }
            Err(e) if e.error_len().is_none() => {
                // Incomplete sequence at the end: keep the tail for the next read.
                let valid = e.valid_up_to();
                let out = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);
                out
            }
            Err(_) => {
                let out = latin1(&self.pending);
                self.pending.clear();
                out
            }
        }
    }

    /// Flush whatever is still held back
    pub fn finish(&mut self) -> String {
        let out = latin1(&self.pending);
        self.pending.clear();
        out
    }
}

#[derive(Debug, Default)]
struct LineState {
    queue: VecDeque<String>,
    partial: String,
    closed: bool,
}

/// FIFO of complete lines shared between one reader and its consumer.
#[derive(Debug, Default)]
pub struct LineBuffer {
    state: Mutex<LineState>,
    ready: Condvar,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append decoded text; returns the lines it completed.
    pub fn push_text(&self, text: &str) -> Vec<String> {
        let mut completed = Vec::new();
        {
            let mut state = self.lock();
            state.partial.push_str(text);
            while let Some(pos) = state.partial.find('\n') {
                let rest = state.partial.split_off(pos + 1);
                let line = std::mem::replace(&mut state.partial, rest);
                let line = line.trim_end_matches('\n').trim_end_matches('\r').to_string();
                state.queue.push_back(line.clone());
                completed.push(line);
            }
        }
        if !completed.is_empty() {
            self.ready.notify_all();
        }
        completed
    }

    /// Mark the stream finished. A trailing line without newline is
    /// delivered as the last line.
    pub fn close(&self) -> Option<String> {
        let tail = {
            let mut state = self.lock();
            state.closed = true;
            if state.partial.is_empty() {
                None
            } else {
                let line = std::mem::take(&mut state.partial)
                    .trim_end_matches('\r')
                    .to_string();
                state.queue.push_back(line.clone());
                Some(line)
            }
        };
        self.ready.notify_all();
        tail
    }

    pub fn pop(&self) -> Option<String> {
        self.lock().queue.pop_front()
    }

    pub fn has_line(&self) -> bool {
        !self.lock().queue.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Drop all buffered lines; returns how many were discarded.
    pub fn drain(&self) -> usize {
        let mut state = self.lock();
        let n = state.queue.len();
        state.queue.clear();
        n
    }

    /// Wait until a line is buffered, the stream closes, or `timeout` passes.
    pub fn wait(&self, timeout: Duration) {
        let state = self.lock();
        if !state.queue.is_empty() || state.closed {
            return;
        }
        let _ = self
            .ready
            .wait_timeout_while(state, timeout, |s| s.queue.is_empty() && !s.closed);
    }
}

/// Handle to one running reader thread
#[derive(Debug)]
pub struct StreamReader {
    stream: Stream,
    lines: Arc<LineBuffer>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

struct ReaderTask {
    stream: Stream,
    source: File,
    raw: Option<File>,
    lines: Arc<LineBuffer>,
    capture: CaseCapture,
    stop: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl StreamReader {
    /// Spawn a reader draining `source`, which must be non-blocking.
    ///
    /// `active` is incremented while the thread runs.
    pub fn spawn(
        stream: Stream,
        source: File,
        raw: Option<File>,
        capture: CaseCapture,
        active: Arc<AtomicUsize>,
    ) -> io::Result<Self> {
        let lines = Arc::new(LineBuffer::new());
        let stop = Arc::new(AtomicBool::new(false));
        let task = ReaderTask {
            stream,
            source,
            raw,
            lines: Arc::clone(&lines),
            capture,
            stop: Arc::clone(&stop),
            active: Arc::clone(&active),
        };

        active.fetch_add(1, Ordering::SeqCst);
        let handle = thread::Builder::new()
            .name(format!("reader-{}", stream))
            .spawn(move || task.run());
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                active.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        };

        Ok(StreamReader {
            stream,
            lines,
            stop,
            handle: Some(handle),
        })
    }

    pub fn lines(&self) -> &Arc<LineBuffer> {
        &self.lines
    }

    /// Ask the reader to finish (after a final drain) and join it.
    pub fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("{} reader panicked", self.stream);
            }
        }
    }
}

impl ReaderTask {
    fn run(mut self) {
        let mut decoder = Decoder::new();
        let mut buf = [0u8; READ_CHUNK];
        let mut reads_after_stop = 0;

        loop {
            match self.source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let text = decoder.push(&buf[..n]);
                    self.consume(&buf[..n], &text);
                    if self.stop.load(Ordering::SeqCst) {
                        reads_after_stop += 1;
                        if reads_after_stop > MAX_READS_AFTER_STOP {
                            warn!("{} reader stopping with output still arriving", self.stream);
                            break;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // Nothing pending; a stop request is honoured only here so
                    // everything already written is drained first.
                    if self.stop.load(Ordering::SeqCst) {
                        break;
                    }
                    thread::sleep(IDLE_SLEEP);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // EIO: every slave end is closed, the descriptor is done.
                Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                Err(e) => {
                    warn!("{} reader stopped on read error: {}", self.stream, e);
                    break;
                }
            }
        }

        let rest = decoder.finish();
        if !rest.is_empty() {
            self.consume(&[], &rest);
        }
        if let Some(tail) = self.lines.close() {
            self.capture.record(self.channel(), &tail);
        }
        debug!("{} reader finished", self.stream);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn channel(&self) -> Channel {
        match self.stream {
            Stream::Stdout => Channel::Stdout,
            Stream::Stderr => Channel::Stderr,
        }
    }

    fn consume(&mut self, raw: &[u8], text: &str) {
        if let Some(file) = self.raw.as_mut() {
            if let Err(e) = file.write_all(raw) {
                warn!("{} raw capture write failed, disabling it: {}", self.stream, e);
                self.raw = None;
            }
        }
        for line in self.lines.push_text(text) {
            debug!("{} | {}", self.stream, line);
            self.capture.record(self.channel(), &line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn decoder_holds_split_sequences() {
        let mut decoder = Decoder::new();
        let bytes = "grüß".as_bytes();
        // split inside the two-byte 'ü'
        assert_eq!(decoder.push(&bytes[..3]), "gr");
        assert_eq!(decoder.push(&bytes[3..]), "üß");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn decoder_falls_back_to_latin1() {
        let mut decoder = Decoder::new();
        assert_eq!(decoder.push(&[b'a', 0xE9, b'b']), "aéb");
    }

    #[test]
    fn line_buffer_splits_and_strips_carriage_returns() {
        let lines = LineBuffer::new();
        assert!(lines.push_text("one\r\ntw").len() == 1);
        assert_eq!(lines.push_text("o\nthree"), vec!["two".to_string()]);
        assert_eq!(lines.close(), Some("three".to_string()));

        assert_eq!(lines.pop().as_deref(), Some("one"));
        assert_eq!(lines.pop().as_deref(), Some("two"));
        assert_eq!(lines.pop().as_deref(), Some("three"));
        assert_eq!(lines.pop(), None);
        assert!(lines.is_closed());
    }

    #[test]
    fn wait_returns_on_close() {
        let lines = Arc::new(LineBuffer::new());
        let closer = Arc::clone(&lines);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });

        let start = Instant::now();
        lines.wait(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(lines.is_closed());
        t.join().unwrap();
    }

    #[test]
    fn drain_discards_buffered_lines() {
        let lines = LineBuffer::new();
        lines.push_text("a\nb\n");
        assert_eq!(lines.drain(), 2);
        assert!(!lines.has_line());
    }
}
