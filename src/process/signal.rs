/// Process-group signalling
///
/// Supervised processes lead their own process group, so one `killpg`
/// reaches every descendant the subject program spawned.
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::time::{Duration, Instant};

/// What happened during a group termination
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillReport {
    pub term_sent: bool,
    pub kill_sent: bool,
    pub waited_ms: u64,
    pub notes: Vec<String>,
}

/// Send `signal` to the whole group led by `pgid`.
///
/// Returns `Ok(false)` when the group no longer exists.
pub fn signal_group(pgid: Pid, signal: Signal) -> nix::Result<bool> {
    match killpg(pgid, signal) {
        Ok(()) => {
            debug!("sent {:?} to process group {}", signal, pgid);
            Ok(true)
        }
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(e),
    }
}

/// SIGTERM the group, give it `escalation` to exit, then SIGKILL it.
pub fn terminate_group(pgid: Pid, escalation: Duration) -> KillReport {
    let mut report = KillReport::default();
    let start = Instant::now();

    match signal_group(pgid, Signal::SIGTERM) {
        Ok(true) => report.term_sent = true,
        Ok(false) => {
            report.notes.push("group already gone before SIGTERM".to_string());
            report.waited_ms = start.elapsed().as_millis() as u64;
            return report;
        }
        Err(e) => report.notes.push(format!("group SIGTERM failed: {}", e)),
    }

    std::thread::sleep(escalation);

    match signal_group(pgid, Signal::SIGKILL) {
        Ok(true) => report.kill_sent = true,
        Ok(false) => report.notes.push("group exited after SIGTERM".to_string()),
        Err(e) => {
            warn!("SIGKILL to process group {} failed: {}", pgid, e);
            report.notes.push(format!("group SIGKILL failed: {}", e));
        }
    }

    report.waited_ms = start.elapsed().as_millis() as u64;
    report
}

/// True while any member of the group is alive (zombies included).
pub fn group_alive(pgid: Pid) -> bool {
    // Signal 0 only checks for existence.
    matches!(killpg(pgid, None::<Signal>), Ok(()) | Err(Errno::EPERM))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    #[test]
    fn missing_group_reports_false() {
        // pid_max on Linux is at most 2^22, so this group cannot exist.
        let pgid = Pid::from_raw(4_194_303 + 1);
        assert_eq!(signal_group(pgid, Signal::SIGTERM), Ok(false));
        assert!(!group_alive(pgid));
    }

    #[test]
    fn terminate_group_kills_sleeping_child() {
        let mut child = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let pgid = Pid::from_raw(child.id() as i32);

        let report = terminate_group(pgid, Duration::from_millis(50));
        assert!(report.term_sent);

        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(!group_alive(pgid));
    }
}
