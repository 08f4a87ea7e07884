//! Readiness loop between the pty, host stdio, and the control channel
//!
//! Three registered sources, one blocking poll. Bytes move pty-to-stdout
//! and stdin-to-pty in fixed-size chunks; resize records arrive on the
//! dedicated control descriptor. The loop ends when the pty reaches EOF;
//! the other two sources merely deregister on theirs.

use std::io;
use std::os::fd::RawFd;

use thiserror::Error;
use tracing::{debug, info};

use crate::protocol::{self, ProtocolError};
use crate::unix::pty::{PtyError, PtySession};

/// Upper bound for one forwarding read.
const CHUNK_SIZE: usize = 1024;

/// Descriptor the host opens for resize records.
const CONTROL_FD: RawFd = 3;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Resize-control descriptor is not open: {0}")]
    ControlChannel(#[source] io::Error),

    #[error("Failed to poll: {0}")]
    Poll(#[source] io::Error),

    #[error("Failed to forward output: {0}")]
    Forward(#[source] io::Error),

    #[error("Invalid resize payload: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Pty session failed: {0}")]
    Pty(#[from] PtyError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Which duty a registered descriptor serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    PtyToHost,
    HostToPty,
    ControlChannel,
}

#[derive(Debug)]
struct Registration {
    kind: SourceKind,
    fd: RawFd,
    active: bool,
}

/// The fixed table of event sources.
#[derive(Debug)]
struct SourceTable {
    entries: [Registration; 3],
}

impl SourceTable {
    fn new(pty_fd: RawFd) -> Self {
        Self {
            entries: [
                Registration {
                    kind: SourceKind::PtyToHost,
                    fd: pty_fd,
                    active: true,
                },
                Registration {
                    kind: SourceKind::HostToPty,
                    fd: libc::STDIN_FILENO,
                    active: true,
                },
                Registration {
                    kind: SourceKind::ControlChannel,
                    fd: CONTROL_FD,
                    active: true,
                },
            ],
        }
    }

    /// Deactivate one source. Deactivating it again is a no-op.
    fn deregister(&mut self, kind: SourceKind) {
        for entry in &mut self.entries {
            if entry.kind == kind {
                entry.active = false;
            }
        }
    }

    #[allow(dead_code)]
    fn is_active(&self, kind: SourceKind) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.kind == kind && entry.active)
    }

    /// Build the poll set over the active entries.
    fn poll_set(&self) -> (Vec<libc::pollfd>, Vec<SourceKind>) {
        let mut fds = Vec::with_capacity(self.entries.len());
        let mut kinds = Vec::with_capacity(self.entries.len());
        for entry in self.entries.iter().filter(|entry| entry.active) {
            fds.push(libc::pollfd {
                fd: entry.fd,
                events: libc::POLLIN,
                revents: 0,
            });
            kinds.push(entry.kind);
        }
        (fds, kinds)
    }
}

/// Proxies one child session against the host's standard streams.
pub struct PtyBridge {
    session: PtySession,
    sources: SourceTable,
}

impl PtyBridge {
    /// The control descriptor must already be open; the host passes it in
    /// alongside stdio. Registering a dead descriptor would spin the loop.
    pub fn new(session: PtySession) -> Result<Self> {
        if unsafe { libc::fcntl(CONTROL_FD, libc::F_GETFD) } == -1 {
            return Err(BridgeError::ControlChannel(io::Error::last_os_error()));
        }
        let sources = SourceTable::new(session.master_fd());
        Ok(Self { session, sources })
    }

    /// Run until the pty reaches EOF, then reap the child and return its
    /// translated exit code.
    pub fn run(mut self) -> Result<i32> {
        const READY: i16 = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

        let mut buffer = [0u8; CHUNK_SIZE];
        let mut running = true;
        while running {
            let (mut fds, kinds) = self.sources.poll_set();
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if rc < 0 {
                let error = io::Error::last_os_error();
                if error.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(BridgeError::Poll(error));
            }
            for (pollfd, kind) in fds.iter().zip(&kinds) {
                if pollfd.revents & READY == 0 {
                    continue;
                }
                if !self.dispatch(*kind, &mut buffer)? {
                    // Remaining ready sources are moot once the pty closed
                    running = false;
                    break;
                }
            }
        }

        let code = self.session.wait()?;
        info!(pid = self.session.pid().as_raw(), code, "child exited");
        Ok(code)
    }

    /// Service one ready source. Returns false when the loop should end.
    fn dispatch(&mut self, kind: SourceKind, buffer: &mut [u8]) -> Result<bool> {
        match kind {
            SourceKind::PtyToHost => {
                let count = read_chunk(self.session.master_fd(), buffer);
                if count == 0 {
                    // Child side closed; that is the shutdown signal
                    self.sources.deregister(SourceKind::PtyToHost);
                    return Ok(false);
                }
                write_all(|chunk| fd_write(libc::STDOUT_FILENO, chunk), &buffer[..count])
                    .map_err(BridgeError::Forward)?;
            }
            SourceKind::HostToPty => {
                let count = read_chunk(libc::STDIN_FILENO, buffer);
                if count == 0 {
                    debug!("host stdin closed");
                    self.sources.deregister(SourceKind::HostToPty);
                    return Ok(true);
                }
                write_all(
                    |chunk| fd_write(self.session.master_fd(), chunk),
                    &buffer[..count],
                )
                .map_err(BridgeError::Forward)?;
            }
            SourceKind::ControlChannel => {
                let count = read_chunk(CONTROL_FD, buffer);
                if count == 0 {
                    debug!("control channel closed");
                    self.sources.deregister(SourceKind::ControlChannel);
                    return Ok(true);
                }
                for command in protocol::parse_payload(&buffer[..count])? {
                    self.session.resize(&command)?;
                    debug!(rows = command.rows, columns = command.columns, "resized pty");
                }
            }
        }
        Ok(true)
    }
}

/// Read once, up to the buffer's length. EOF and read errors both come back
/// as zero; an interrupted read retries.
fn read_chunk(fd: RawFd, buffer: &mut [u8]) -> usize {
    loop {
        let count =
            unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut libc::c_void, buffer.len()) };
        if count >= 0 {
            return count as usize;
        }
        let error = io::Error::last_os_error();
        if error.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        debug!(fd, %error, "read failed, treating as end of stream");
        return 0;
    }
}

/// Write the whole buffer, looping over short writes.
fn write_all(
    mut write: impl FnMut(&[u8]) -> io::Result<usize>,
    mut remaining: &[u8],
) -> io::Result<()> {
    while !remaining.is_empty() {
        match write(remaining) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(written) => remaining = &remaining[written..],
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    Ok(())
}

fn fd_write(fd: RawFd, chunk: &[u8]) -> io::Result<usize> {
    let count = unsafe { libc::write(fd, chunk.as_ptr() as *const libc::c_void, chunk.len()) };
    if count < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(count as usize)
}
