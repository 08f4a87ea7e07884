//! POSIX side of the bridge
//!
//! The hosted command runs on a real pseudo-terminal; the bridge process
//! sits between that terminal and the host's pipes:
//!
//! ```text
//!             stdin (fd 0)  ──────────►  pty master  ──►  child stdio
//!   host      stdout (fd 1) ◄──────────  pty master
//!             control (fd 3) ─resize──►  TIOCSWINSZ (kernel sends SIGWINCH)
//! ```
//!
//! EOF on the pty ends the session; the child's wait status becomes this
//! process's exit code.

mod bridge;
mod pty;

pub use bridge::PtyBridge;
pub use pty::PtySession;

/// Tests that place a pipe on the fixed control descriptor share the
/// process-wide descriptor table with every test that opens one. They hold
/// this lock so a concurrent test never has its descriptor redirected out
/// from under it.
#[cfg(test)]
pub(crate) mod fd_lock {
    use std::sync::{Mutex, MutexGuard};

    static LOCK: Mutex<()> = Mutex::new(());

    pub(crate) fn acquire() -> MutexGuard<'static, ()> {
        LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
