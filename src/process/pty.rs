/// Pseudo-terminal allocation for supervised processes
use crate::config::types::{HarnessError, Result, SpawnFailure};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{openpty, Winsize};
use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, OutputFlags, SetArg, Termios};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};

/// Which end of the conversation a pty carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtyRole {
    /// Harness writes to the master, child reads the slave
    Input,
    /// Child writes to the slave, harness reads the master
    Output,
}

/// One master/slave pair
#[derive(Debug)]
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

fn pty_error(context: &str, errno: nix::errno::Errno) -> HarnessError {
    HarnessError::Spawn {
        command: context.to_string(),
        failure: SpawnFailure::PtyAllocation,
        source: io::Error::from(errno),
    }
}

/// Allocate a pty pair configured for `role`.
///
/// Input ptys keep canonical mode (so the child reads whole lines and a
/// Ctrl-D means EOF) but do not echo. Output ptys skip `\n` → `\r\n`
/// translation. Output masters are non-blocking so readers can be stopped.
pub fn allocate(role: PtyRole) -> Result<PtyPair> {
    let pair = openpty(None::<&Winsize>, None::<&Termios>).map_err(|e| pty_error("openpty", e))?;

    let mut termios = tcgetattr(&pair.slave).map_err(|e| pty_error("tcgetattr", e))?;
    match role {
        PtyRole::Input => {
            termios.local_flags.remove(
                LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ECHOK | LocalFlags::ECHONL,
            );
        }
        PtyRole::Output => {
            termios.output_flags.remove(OutputFlags::ONLCR);
        }
    }
    tcsetattr(&pair.slave, SetArg::TCSANOW, &termios).map_err(|e| pty_error("tcsetattr", e))?;

    if role == PtyRole::Output {
        set_nonblocking(&pair.master).map_err(|e| pty_error("fcntl(O_NONBLOCK)", e))?;
    }

    Ok(PtyPair {
        master: pair.master,
        slave: pair.slave,
    })
}

fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
    let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Read, Write};

    #[test]
    fn output_pty_passes_bytes_without_crlf() {
        let pair = allocate(PtyRole::Output).unwrap();
        let mut slave = File::from(pair.slave);
        let mut master = File::from(pair.master);

        slave.write_all(b"hello\n").unwrap();

        let mut buf = [0u8; 64];
        let mut got = Vec::new();
        for _ in 0..50 {
            match master.read(&mut buf) {
                Ok(n) => {
                    got.extend_from_slice(&buf[..n]);
                    if got.ends_with(b"\n") {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
                Err(e) => panic!("read failed: {e}"),
            }
        }
        assert_eq!(got, b"hello\n");
    }

    #[test]
    fn input_pty_does_not_echo() {
        let pair = allocate(PtyRole::Input).unwrap();
        let mut master = File::from(pair.master);
        let mut slave = File::from(pair.slave);

        master.write_all(b"line\n").unwrap();
        let mut buf = [0u8; 16];
        let n = slave.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"line\n");

        set_nonblocking(&OwnedFd::from(master.try_clone().unwrap())).unwrap();
        match master.read(&mut buf) {
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::WouldBlock),
            Ok(n) => panic!("unexpected echo of {n} bytes"),
        }
    }
}
