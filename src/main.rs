//! ptybridge - terminal plumbing between a host process and a hosted command
//!
//! The host owns the user-facing terminal emulator; ptybridge owns the
//! child's end of it. On POSIX systems the bridge forks the command onto a
//! fresh pseudo-terminal and proxies bytes between that terminal and its own
//! standard streams, applying resize records that arrive on file
//! descriptor 3. On Windows the child already runs in a real console window;
//! the bridge attaches to that console by pid (read from stdin) and resizes
//! the hidden window to match incoming size records.
//!
//! # Wire format
//!
//! Resize records are newline-delimited `<rows>x<columns>` pairs of decimal
//! cell counts, for example `24x80`.
//!
//! # Exit codes
//!
//! | Condition | Code |
//! |-----------|------|
//! | Child exited normally (POSIX) | the child's code |
//! | Child killed by signal N (POSIX) | 128 + N |
//! | Command could not be exec'd (POSIX) | 127 |
//! | Target gone or input closed (Windows) | 0 |
//! | Bridge failure | 1 |

// Geometry and retry logic are platform-neutral so their tests run
// anywhere; at runtime only the Windows bridge exercises them.
#[allow(dead_code)]
mod geometry;
mod protocol;
#[allow(dead_code)]
mod search;
#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod win;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Logging goes to stderr; stdout belongs to the bridged byte stream on
/// POSIX and to the control dialogue on Windows. `RUST_LOG` adjusts the
/// filter, defaulting to `info`.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> anyhow::Result<()> {
    init_logging();
    info!("ptybridge starting");
    run()
}

#[cfg(unix)]
fn run() -> anyhow::Result<()> {
    use std::ffi::OsString;

    let argv: Vec<OsString> = std::env::args_os().skip(1).collect();
    if argv.is_empty() {
        eprintln!("usage: ptybridge <program> [argument...]");
        std::process::exit(1);
    }

    let session = unix::PtySession::spawn(&argv)?;
    let bridge = unix::PtyBridge::new(session)?;
    let code = bridge.run()?;
    std::process::exit(code);
}

#[cfg(windows)]
fn run() -> anyhow::Result<()> {
    win::run()?;
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn run() -> anyhow::Result<()> {
    anyhow::bail!("ptybridge supports POSIX and Windows targets only");
}
