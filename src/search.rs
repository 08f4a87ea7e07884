//! Bounded retry policy for console-window lookup
//!
//! A console window can appear well after its process exists, so the lookup
//! runs as a fixed number of attempts on a fixed interval. The policy lives
//! apart from the platform survey calls so attempt counting and exhaustion
//! reporting stay testable anywhere.

use std::thread;
use std::time::Duration;

/// Everything one attempt observed. `matched` carries the winning value when
/// the attempt succeeded; the rendered process and window lists are reported
/// verbatim if every attempt comes up empty.
#[derive(Debug)]
pub struct Survey<T> {
    pub matched: Option<T>,
    pub processes: Vec<String>,
    pub windows: Vec<String>,
}

impl<T> Default for Survey<T> {
    fn default() -> Self {
        Self {
            matched: None,
            processes: Vec::new(),
            windows: Vec::new(),
        }
    }
}

/// Run up to `retries` attempts, `interval` apart, and return the first
/// match. Attempt numbers passed to `attempt` start at 1. When every attempt
/// comes back empty, `exhausted` turns the final attempt's observations into
/// the caller's error; an attempt that itself fails ends the search at once.
pub fn with_retry<T, E>(
    retries: u32,
    interval: Duration,
    mut attempt: impl FnMut(u32) -> Result<Survey<T>, E>,
    exhausted: impl FnOnce(u32, Survey<T>) -> E,
) -> Result<T, E> {
    let mut observed = Survey::default();
    for try_number in 1..=retries {
        let mut survey = attempt(try_number)?;
        if let Some(found) = survey.matched.take() {
            return Ok(found);
        }
        observed = survey;
        if try_number < retries {
            thread::sleep(interval);
        }
    }
    Err(exhausted(retries, observed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn survey(matched: Option<u32>) -> Survey<u32> {
        Survey {
            matched,
            processes: vec!["10 host.exe".into()],
            windows: vec!["0x1 \"Shell\"".into()],
        }
    }

    #[test]
    fn test_match_on_nth_attempt_stops_early() {
        let mut attempts = 0;
        let found = with_retry(
            10,
            Duration::ZERO,
            |try_number| {
                attempts = try_number;
                Ok::<_, String>(survey((try_number == 3).then_some(7)))
            },
            |_, _| "exhausted".to_string(),
        )
        .unwrap();
        assert_eq!(found, 7);
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_exhaustion_reports_final_observations() {
        let result: Result<u32, String> = with_retry(
            4,
            Duration::ZERO,
            |_| Ok(survey(None)),
            |attempts, observed| {
                format!(
                    "{} attempts; saw {:?} and {:?}",
                    attempts, observed.processes, observed.windows
                )
            },
        );
        let message = result.unwrap_err();
        assert!(message.contains("4 attempts"));
        assert!(message.contains("10 host.exe"));
        assert!(message.contains("Shell"));
    }

    #[test]
    fn test_attempt_error_ends_search_immediately() {
        let mut calls = 0;
        let result: Result<u32, &str> = with_retry(
            5,
            Duration::ZERO,
            |_| {
                calls += 1;
                Err("survey failed")
            },
            |_, _| "exhausted",
        );
        assert_eq!(result.unwrap_err(), "survey failed");
        assert_eq!(calls, 1);
    }
}
