//! Resize-control wire format
//!
//! Both platform bridges consume the same line-oriented protocol: UTF-8 text,
//! one record per line, each record `"<rows>x<columns>"` with decimal fields.
//! Parsing is strict; a malformed record poisons the whole read.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Control payload is not valid UTF-8: {0}")]
    Encoding(#[source] std::str::Utf8Error),

    #[error("Malformed resize record {record:?}: missing `x` separator")]
    MissingSeparator { record: String },

    #[error("Malformed resize record {record:?}: {source}")]
    Field {
        record: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[allow(dead_code)]
    #[error("Malformed process id {line:?}: {source}")]
    ProcessId {
        line: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// One resize request: the cell geometry the child's terminal should adopt.
///
/// The wire order is rows-then-columns on every platform; named fields keep
/// that meaning intact across later width/height and X/Y conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeCommand {
    pub rows: u16,
    pub columns: u16,
}

impl ResizeCommand {
    /// Parse a single `"<rows>x<columns>"` record.
    ///
    /// Whitespace around either field is tolerated and trimmed. Fields are
    /// 16-bit because both the pty winsize and the console coordinate types
    /// are; anything larger is rejected as malformed.
    pub fn parse(record: &str) -> Result<Self> {
        let (rows, columns) = record.split_once('x').ok_or_else(|| {
            ProtocolError::MissingSeparator {
                record: record.to_string(),
            }
        })?;
        let rows = rows.trim().parse().map_err(|source| ProtocolError::Field {
            record: record.to_string(),
            source,
        })?;
        let columns = columns
            .trim()
            .parse()
            .map_err(|source| ProtocolError::Field {
                record: record.to_string(),
                source,
            })?;
        Ok(Self { rows, columns })
    }
}

impl fmt::Display for ResizeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.columns)
    }
}

/// Decode one control-channel read and parse every record in it.
///
/// The whole payload is rejected if it is not valid UTF-8 or if any line
/// fails to parse, including an empty one.
#[allow(dead_code)]
pub fn parse_payload(payload: &[u8]) -> Result<Vec<ResizeCommand>> {
    let text = std::str::from_utf8(payload).map_err(ProtocolError::Encoding)?;
    text.lines().map(ResizeCommand::parse).collect()
}

/// Parse the target-process-id line that precedes any resize records.
#[allow(dead_code)]
pub fn parse_pid(line: &str) -> Result<u32> {
    line.trim().parse().map_err(|source| ProtocolError::ProcessId {
        line: line.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let cmd = ResizeCommand::parse("24x80").unwrap();
        assert_eq!(cmd.rows, 24);
        assert_eq!(cmd.columns, 80);
        assert_eq!(cmd.to_string(), "24x80");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let cmd = ResizeCommand::parse(" 24 x 80 ").unwrap();
        assert_eq!(cmd, ResizeCommand { rows: 24, columns: 80 });

        // Trimming is idempotent: a clean record parses to the same value
        assert_eq!(ResizeCommand::parse("24x80").unwrap(), cmd);
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        assert!(matches!(
            ResizeCommand::parse("2480"),
            Err(ProtocolError::MissingSeparator { .. })
        ));
        assert!(matches!(
            ResizeCommand::parse(""),
            Err(ProtocolError::MissingSeparator { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_fields() {
        assert!(ResizeCommand::parse("24x").is_err());
        assert!(ResizeCommand::parse("x80").is_err());
        assert!(ResizeCommand::parse("24x80x3").is_err());
        assert!(ResizeCommand::parse("-1x80").is_err());
        assert!(ResizeCommand::parse("ax80").is_err());
        assert!(ResizeCommand::parse("70000x80").is_err());
    }

    #[test]
    fn test_payload_splits_records() {
        let cmds = parse_payload(b"24x80\n50x132\n").unwrap();
        assert_eq!(
            cmds,
            vec![
                ResizeCommand { rows: 24, columns: 80 },
                ResizeCommand { rows: 50, columns: 132 },
            ]
        );
    }

    #[test]
    fn test_payload_rejects_invalid_utf8() {
        assert!(matches!(
            parse_payload(b"\xff24x80\n"),
            Err(ProtocolError::Encoding(_))
        ));
    }

    #[test]
    fn test_payload_rejects_blank_record() {
        assert!(parse_payload(b"24x80\n\n").is_err());
    }

    #[test]
    fn test_pid_line() {
        assert_eq!(parse_pid(" 4242 \n").unwrap(), 4242);
        assert!(parse_pid("shell").is_err());
        assert!(parse_pid("").is_err());
    }
}
