/// Core types shared across the harness
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Why a subject program could not be started.
///
/// These are execution-environment problems (missing binary, bad working
/// directory, missing permissions), reported apart from grading failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpawnFailure {
    NotFound,
    NotADirectory,
    PermissionDenied,
    PtyAllocation,
    Other,
}

impl SpawnFailure {
    /// Classify an OS error raised by `spawn`.
    pub fn classify(err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::ENOENT) => SpawnFailure::NotFound,
            Some(libc::ENOTDIR) => SpawnFailure::NotADirectory,
            Some(libc::EACCES) | Some(libc::EPERM) => SpawnFailure::PermissionDenied,
            _ => match err.kind() {
                io::ErrorKind::NotFound => SpawnFailure::NotFound,
                io::ErrorKind::PermissionDenied => SpawnFailure::PermissionDenied,
                _ => SpawnFailure::Other,
            },
        }
    }
}

impl fmt::Display for SpawnFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SpawnFailure::NotFound => write!(f, "executable not found"),
            SpawnFailure::NotADirectory => write!(f, "not a directory"),
            SpawnFailure::PermissionDenied => write!(f, "permission denied"),
            SpawnFailure::PtyAllocation => write!(f, "pty allocation failed"),
            SpawnFailure::Other => write!(f, "spawn failed"),
        }
    }
}

/// Output stream of a supervised process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    #[default]
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for the harness
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Execution environment error: {failure} while starting '{command}': {source}")]
    Spawn {
        command: String,
        failure: SpawnFailure,
        #[source]
        source: io::Error,
    },

    #[error("Privilege error: {0}")]
    Privilege(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Report error: {0}")]
    Report(String),
}

impl HarnessError {
    /// True for failures of the execution environment rather than the
    /// program under test.
    pub fn is_environment(&self) -> bool {
        matches!(self, HarnessError::Spawn { .. } | HarnessError::Privilege(_))
    }
}

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_spawn_errors() {
        let not_found = io::Error::from_raw_os_error(libc::ENOENT);
        assert_eq!(SpawnFailure::classify(&not_found), SpawnFailure::NotFound);

        let not_dir = io::Error::from_raw_os_error(libc::ENOTDIR);
        assert_eq!(SpawnFailure::classify(&not_dir), SpawnFailure::NotADirectory);

        let denied = io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(SpawnFailure::classify(&denied), SpawnFailure::PermissionDenied);

        let other = io::Error::new(io::ErrorKind::Other, "boom");
        assert_eq!(SpawnFailure::classify(&other), SpawnFailure::Other);
    }

    #[test]
    fn spawn_errors_are_environment_errors() {
        let err = HarnessError::Spawn {
            command: "/nope".to_string(),
            failure: SpawnFailure::NotFound,
            source: io::Error::from_raw_os_error(libc::ENOENT),
        };
        assert!(err.is_environment());
        assert!(err.to_string().contains("executable not found"));
        assert!(!HarnessError::Config("x".to_string()).is_environment());
    }
}
