//! Pty session: fork, exec, resize, reap
//!
//! Owns the master side of the pseudo-terminal and the child spawned onto
//! it. The slave side becomes the child's controlling terminal and stdio;
//! the parent keeps only the master descriptor.

use std::ffi::{CString, OsString};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{dup2, execvp, fork, setsid, ForkResult, Pid};
use thiserror::Error;
use tracing::info;

use crate::protocol::ResizeCommand;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("No command given to spawn")]
    EmptyCommand,

    #[error("Command contains an interior NUL byte")]
    NulByte(#[from] std::ffi::NulError),

    #[error("Failed to open a pseudo-terminal: {0}")]
    Openpty(#[source] io::Error),

    #[error("Failed to fork: {0}")]
    Fork(#[source] Errno),

    #[error("Failed to set terminal size: {0}")]
    Winsize(#[source] io::Error),

    #[error("Failed to wait for child: {0}")]
    Wait(#[source] Errno),
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// The spawned child and the master side of its terminal.
pub struct PtySession {
    master: OwnedFd,
    child: Pid,
}

impl PtySession {
    /// Fork `argv` onto a fresh pseudo-terminal.
    ///
    /// The child becomes a session leader with the slave as its controlling
    /// terminal and stdio, then execs. Exec failure ends the child with
    /// status 127 and a diagnostic on the pty; the parent only ever sees
    /// that as output, EOF, and the wait status.
    pub fn spawn(argv: &[OsString]) -> Result<Self> {
        let program = CString::new(argv.first().ok_or(PtyError::EmptyCommand)?.as_bytes())?;
        let args = argv
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut master: RawFd = -1;
        let mut slave: RawFd = -1;
        let rc = unsafe {
            libc::openpty(
                &mut master,
                &mut slave,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if rc != 0 {
            return Err(PtyError::Openpty(io::Error::last_os_error()));
        }

        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                unsafe { libc::close(slave) };
                // Safety: openpty handed us this descriptor and nothing else owns it
                let master = unsafe { OwnedFd::from_raw_fd(master) };
                info!(pid = child.as_raw(), command = ?argv[0], "spawned child on pty");
                Ok(Self { master, child })
            }
            Ok(ForkResult::Child) => {
                unsafe { libc::close(master) };
                let _ = setsid();
                unsafe { libc::ioctl(slave, libc::TIOCSCTTY, 0) };
                let _ = dup2(slave, libc::STDIN_FILENO);
                let _ = dup2(slave, libc::STDOUT_FILENO);
                let _ = dup2(slave, libc::STDERR_FILENO);
                if slave > libc::STDERR_FILENO {
                    unsafe { libc::close(slave) };
                }
                let Err(errno) = execvp(&program, &args);
                // Stderr is the pty now, so the host sees the diagnostic
                let message = format!(
                    "ptybridge: exec {}: {}\n",
                    argv[0].to_string_lossy(),
                    errno
                );
                unsafe {
                    libc::write(
                        libc::STDERR_FILENO,
                        message.as_ptr() as *const libc::c_void,
                        message.len(),
                    );
                }
                unsafe { libc::_exit(127) }
            }
            Err(errno) => {
                unsafe {
                    libc::close(master);
                    libc::close(slave);
                }
                Err(PtyError::Fork(errno))
            }
        }
    }

    pub fn master_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    pub fn pid(&self) -> Pid {
        self.child
    }

    /// Push a new cell geometry to the terminal. The kernel delivers
    /// SIGWINCH to the child's process group; pixel fields stay zero.
    pub fn resize(&self, command: &ResizeCommand) -> Result<()> {
        let size = libc::winsize {
            ws_row: command.rows,
            ws_col: command.columns,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let rc = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &size) };
        if rc != 0 {
            return Err(PtyError::Winsize(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Reap the child and translate its status into a process exit code.
    pub fn wait(&self) -> Result<i32> {
        loop {
            match waitpid(self.child, None) {
                Ok(status) => {
                    if let Some(code) = exit_code(&status) {
                        return Ok(code);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(PtyError::Wait(errno)),
            }
        }
    }
}

/// Signal deaths use the conventional 128+signal encoding.
fn exit_code(status: &WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(*code),
        WaitStatus::Signaled(_, signal, _) => Some(128 + *signal as i32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{kill, Signal};

    #[test]
    fn test_exit_code_translation() {
        let pid = Pid::from_raw(100);
        assert_eq!(exit_code(&WaitStatus::Exited(pid, 0)), Some(0));
        assert_eq!(exit_code(&WaitStatus::Exited(pid, 42)), Some(42));
        assert_eq!(
            exit_code(&WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            Some(137)
        );
        assert_eq!(
            exit_code(&WaitStatus::Signaled(pid, Signal::SIGTERM, false)),
            Some(143)
        );
        assert_eq!(exit_code(&WaitStatus::StillAlive), None);
    }

    #[test]
    fn test_spawn_rejects_empty_command() {
        assert!(matches!(PtySession::spawn(&[]), Err(PtyError::EmptyCommand)));
    }

    #[test]
    fn test_wait_reports_child_exit_code() {
        let _fds = crate::unix::fd_lock::acquire();
        let argv: Vec<OsString> = vec!["sh".into(), "-c".into(), "exit 7".into()];
        let Ok(session) = PtySession::spawn(&argv) else {
            return; // no pty available in this environment
        };
        assert_eq!(session.wait().unwrap(), 7);
    }

    #[test]
    fn test_signal_death_maps_to_128_plus_signal() {
        let _fds = crate::unix::fd_lock::acquire();
        let argv: Vec<OsString> = vec!["sleep".into(), "30".into()];
        let Ok(session) = PtySession::spawn(&argv) else {
            return;
        };
        kill(session.pid(), Signal::SIGKILL).unwrap();
        assert_eq!(session.wait().unwrap(), 137);
    }

    #[test]
    fn test_exec_failure_exits_127_with_diagnostic() {
        let _fds = crate::unix::fd_lock::acquire();
        let argv: Vec<OsString> = vec!["definitely-not-a-real-command-zz".into()];
        let Ok(session) = PtySession::spawn(&argv) else {
            return;
        };
        let mut buffer = [0u8; 256];
        let count = unsafe {
            libc::read(
                session.master_fd(),
                buffer.as_mut_ptr() as *mut libc::c_void,
                buffer.len(),
            )
        };
        assert_eq!(session.wait().unwrap(), 127);
        if count > 0 {
            let text = String::from_utf8_lossy(&buffer[..count as usize]);
            assert!(text.contains("exec"));
        }
    }

    #[test]
    fn test_resize_applies_winsize() {
        let _fds = crate::unix::fd_lock::acquire();
        let argv: Vec<OsString> = vec!["sleep".into(), "5".into()];
        let Ok(session) = PtySession::spawn(&argv) else {
            return;
        };
        let command = ResizeCommand {
            rows: 48,
            columns: 160,
        };
        session.resize(&command).unwrap();
        let mut size = libc::winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let rc = unsafe { libc::ioctl(session.master_fd(), libc::TIOCGWINSZ, &mut size) };
        assert_eq!(rc, 0);
        assert_eq!(size.ws_row, 48);
        assert_eq!(size.ws_col, 160);
        kill(session.pid(), Signal::SIGKILL).unwrap();
        let _ = session.wait();
    }
}
