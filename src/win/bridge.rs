//! Interactive bridge loop
//!
//! Drives a whole session against standard input: the target pid first,
//! then size records. Blank lines are host watchdog probes; each one
//! triggers a liveness check instead of a resize.

use std::fmt;
use std::io::{self, BufRead, Write};

use thiserror::Error;
use tracing::info;

use crate::protocol::{self, ProtocolError, ResizeCommand};
use crate::win::console::{ConsoleError, ConsoleSession};
use crate::win::lookup::{self, LookupError};

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to read from standard input: {0}")]
    Input(#[source] io::Error),

    #[error("Failed to write to standard output: {0}")]
    Output(#[source] io::Error),

    #[error("Invalid control input: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Console(#[from] ConsoleError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Run the bridge: solicit the target pid, find and take over its console,
/// then apply size records until the child exits or input ends.
pub fn run() -> Result<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();

    let Some(line) = prompt_line(&mut input, "PID: ")? else {
        return Ok(()); // host never supplied a target
    };
    let pid = protocol::parse_pid(&line)?;
    emit(format_args!("received: {pid}"))?;

    let window = lookup::find_console_window(pid)?;
    emit(format_args!("window: {window}"))?;

    let session = ConsoleSession::attach(pid, window.hwnd)?;
    steady_loop(&mut input, &session)?;
    info!(pid, "target gone or input closed, detaching");
    Ok(())
}

fn steady_loop(input: &mut impl BufRead, session: &ConsoleSession) -> Result<()> {
    loop {
        // Liveness precedes every prompt; watchdog blanks loop back here
        let record = loop {
            if !session.process_running() {
                return Ok(());
            }
            let Some(line) = prompt_line(input, "size: ")? else {
                return Ok(());
            };
            if !line.trim().is_empty() {
                break line;
            }
        };
        let command = ResizeCommand::parse(record.trim_end())?;
        emit(format_args!("received: {command}"))?;
        session.apply(&command)?;
        emit(format_args!("resized"))?;
    }
}

/// Write the prompt without a newline, flush, and read one line. `None`
/// means end of input.
fn prompt_line(input: &mut impl BufRead, prompt: &str) -> Result<Option<String>> {
    let mut stdout = io::stdout();
    write!(stdout, "{prompt}").map_err(BridgeError::Output)?;
    stdout.flush().map_err(BridgeError::Output)?;
    let mut line = String::new();
    let read = input.read_line(&mut line).map_err(BridgeError::Input)?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

/// Dialogue lines share stdout with the prompts; a closed host pipe must
/// surface as an error, not a panic.
fn emit(line: fmt::Arguments<'_>) -> Result<()> {
    emit_to(&mut io::stdout(), line)
}

fn emit_to(out: &mut impl Write, line: fmt::Arguments<'_>) -> Result<()> {
    writeln!(out, "{line}").map_err(BridgeError::Output)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::ErrorKind::BrokenPipe.into())
        }
    }

    #[test]
    fn test_dialogue_write_failure_is_an_error() {
        let result = emit_to(&mut ClosedPipe, format_args!("resized"));
        assert!(matches!(result, Err(BridgeError::Output(_))));
    }
}
