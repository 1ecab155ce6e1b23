//! Demotion of a subject program to a named OS user.
//!
//! The caller must already be root: demotion is refused up front instead of
//! letting the child fail after fork.

use crate::config::types::{HarnessError, Result};
use nix::unistd::{geteuid, User};
use std::os::unix::process::CommandExt;
use std::process::Command;

/// Resolved target credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

/// Look up `user` after checking that the caller may switch to it.
pub fn resolve(user: &str) -> Result<Credentials> {
    if !geteuid().is_root() {
        return Err(HarnessError::Privilege(format!(
            "running as user '{}' requires root, current euid is {}",
            user,
            geteuid()
        )));
    }

    let entry = User::from_name(user)
        .map_err(|e| HarnessError::Config(format!("user lookup for '{}' failed: {}", user, e)))?
        .ok_or_else(|| HarnessError::Config(format!("unknown user '{}'", user)))?;

    let creds = Credentials {
        uid: entry.uid.as_raw(),
        gid: entry.gid.as_raw(),
    };
    if creds.uid == 0 || creds.gid == 0 {
        return Err(HarnessError::Privilege(format!(
            "refusing to run as '{}': resolves to root credentials",
            user
        )));
    }
    Ok(creds)
}

/// Install the credential switch into `command`.
///
/// Runs in the forked child before exec: supplementary groups are cleared
/// first, and the GID is set before the UID so the saved-set-user-ID cannot
/// be used to regain privileges.
pub fn apply(command: &mut Command, creds: Credentials) {
    let Credentials { uid, gid } = creds;
    // SAFETY: the closure only performs async-signal-safe libc calls.
    unsafe {
        command.pre_exec(move || {
            if libc::setgroups(0, std::ptr::null()) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::setresgid(gid, gid, gid) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::setresuid(uid, uid, uid) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_root_caller_is_refused_before_lookup() {
        if geteuid().is_root() {
            return;
        }
        let err = resolve("definitely-not-a-user").unwrap_err();
        assert!(matches!(err, HarnessError::Privilege(_)));
        assert!(err.is_environment());
    }

    #[test]
    fn root_caller_gets_unknown_user_error() {
        if !geteuid().is_root() {
            return;
        }
        let err = resolve("definitely-not-a-user").unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn root_target_is_refused() {
        if !geteuid().is_root() {
            return;
        }
        assert!(matches!(resolve("root"), Err(HarnessError::Privilege(_))));
    }
}
