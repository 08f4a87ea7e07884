//! Process and window discovery
//!
//! Correlates the target process and its descendants with a top-level
//! window. Each attempt snapshots the process table, walks out the
//! descendant set, then enumerates windows and matches on the owning pid.
//! Every attempt reports what it saw on stdout so the host log shows why
//! a lookup stalled.

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Write};
use std::time::Duration;

use thiserror::Error;

use windows::Win32::Foundation::{CloseHandle, BOOL, HWND, LPARAM, TRUE};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowTextW, GetWindowThreadProcessId, IsWindowVisible,
};

use crate::search::{self, Survey};

/// How many lookup attempts before giving up.
const LOOKUP_RETRIES: u32 = 10;

/// Pause between attempts.
const LOOKUP_RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Failed to snapshot processes: {0}")]
    Snapshot(#[source] windows::core::Error),

    #[error("Failed to enumerate windows: {0}")]
    Enumerate(#[source] windows::core::Error),

    #[error("Failed to write survey output: {0}")]
    Report(#[source] io::Error),

    #[error("Target process {pid} not found")]
    NoSuchProcess { pid: u32 },

    #[error(
        "No console window found after {attempts} attempt(s); processes: [{}]; windows: [{}]",
        .processes.join(", "),
        .windows.join(", ")
    )]
    Exhausted {
        attempts: u32,
        processes: Vec<String>,
        windows: Vec<String>,
    },
}

pub type Result<T> = std::result::Result<T, LookupError>;

/// One process observed in the system snapshot.
#[derive(Debug, Clone)]
struct ProcessInfo {
    pid: u32,
    parent: u32,
    name: String,
}

impl fmt::Display for ProcessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.pid, self.name)
    }
}

/// One top-level window observed while enumerating.
#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub hwnd: HWND,
    pub pid: u32,
    pub title: String,
    pub visible: bool,
}

impl fmt::Display for WindowInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x} {:?}", self.hwnd.0 as usize, self.title)
    }
}

/// Find the console window belonging to `pid` or one of its descendants.
///
/// The window usually trails process creation, so the search retries on a
/// fixed interval and only fails once every attempt has come up empty.
pub fn find_console_window(pid: u32) -> Result<WindowInfo> {
    search::with_retry(
        LOOKUP_RETRIES,
        LOOKUP_RETRY_INTERVAL,
        |try_number| {
            let all = snapshot_processes()?;
            // The first attempt requires the target to exist; later ones
            // tolerate a root that exited mid-search, whose children may
            // still own the window.
            if try_number == 1 && !all.iter().any(|process| process.pid == pid) {
                return Err(LookupError::NoSuchProcess { pid });
            }

            let family = family_of(pid, &all);
            let rendered_processes: Vec<String> =
                family.iter().map(ToString::to_string).collect();
            report(format_args!(
                "process(es) (try {}): [{}]",
                try_number,
                rendered_processes.join(", ")
            ))?;

            let windows = survey_windows()?;
            let rendered_windows: Vec<String> =
                windows.iter().map(ToString::to_string).collect();
            report(format_args!(
                "window(s) (try {}): [{}]",
                try_number,
                rendered_windows.join(", ")
            ))?;

            Ok(Survey {
                matched: match_window(&family, &windows),
                processes: rendered_processes,
                windows: rendered_windows,
            })
        },
        |attempts, observed| LookupError::Exhausted {
            attempts,
            processes: observed.processes,
            windows: observed.windows,
        },
    )
}

/// First visible window owned by the family, falling back to any match.
fn match_window(family: &[ProcessInfo], windows: &[WindowInfo]) -> Option<WindowInfo> {
    let pids: HashSet<u32> = family.iter().map(|process| process.pid).collect();
    windows
        .iter()
        .find(|window| window.visible && pids.contains(&window.pid))
        .or_else(|| windows.iter().find(|window| pids.contains(&window.pid)))
        .cloned()
}

/// The survey lines land on the same host pipe as the bridge dialogue; a
/// closed pipe must surface as an error, not a panic.
fn report(line: fmt::Arguments<'_>) -> Result<()> {
    writeln!(io::stdout(), "{line}").map_err(LookupError::Report)
}

/// The root plus every transitive child found in the snapshot. A root
/// missing from the snapshot keeps a placeholder entry so the report names
/// it and children that outlived it still count as family.
fn family_of(root: u32, all: &[ProcessInfo]) -> Vec<ProcessInfo> {
    let mut family = Vec::new();
    let mut pending = vec![root];
    let mut seen: HashSet<u32> = HashSet::new();
    seen.insert(root);
    while let Some(pid) = pending.pop() {
        match all.iter().find(|process| process.pid == pid) {
            Some(info) => family.push(info.clone()),
            None => family.push(ProcessInfo {
                pid,
                parent: 0,
                name: String::from("<exited>"),
            }),
        }
        for child in all.iter().filter(|process| process.parent == pid) {
            if seen.insert(child.pid) {
                pending.push(child.pid);
            }
        }
    }
    family
}

fn snapshot_processes() -> Result<Vec<ProcessInfo>> {
    let mut processes = Vec::new();
    unsafe {
        let snapshot =
            CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0).map_err(LookupError::Snapshot)?;
        let mut entry = PROCESSENTRY32W {
            dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };
        let mut more = Process32FirstW(snapshot, &mut entry).is_ok();
        while more {
            processes.push(ProcessInfo {
                pid: entry.th32ProcessID,
                parent: entry.th32ParentProcessID,
                name: utf16_until_nul(&entry.szExeFile),
            });
            more = Process32NextW(snapshot, &mut entry).is_ok();
        }
        let _ = CloseHandle(snapshot);
    }
    Ok(processes)
}

fn survey_windows() -> Result<Vec<WindowInfo>> {
    unsafe extern "system" fn collect(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let windows = &mut *(lparam.0 as *mut Vec<WindowInfo>);
        let mut pid = 0u32;
        GetWindowThreadProcessId(hwnd, Some(&mut pid));
        let mut title = [0u16; 256];
        let length = GetWindowTextW(hwnd, &mut title) as usize;
        windows.push(WindowInfo {
            hwnd,
            pid,
            title: String::from_utf16_lossy(&title[..length.min(title.len())]),
            visible: IsWindowVisible(hwnd).as_bool(),
        });
        TRUE
    }

    let mut windows: Vec<WindowInfo> = Vec::new();
    unsafe {
        EnumWindows(
            Some(collect),
            LPARAM(&mut windows as *mut Vec<WindowInfo> as isize),
        )
        .map_err(LookupError::Enumerate)?;
    }
    Ok(windows)
}

fn utf16_until_nul(buffer: &[u16]) -> String {
    let length = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..length])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_contains_root() {
        let pid = std::process::id();
        let all = snapshot_processes().unwrap();
        let family = family_of(pid, &all);
        assert!(family.iter().any(|process| process.pid == pid));
    }

    #[test]
    fn test_family_keeps_orphaned_children_of_a_gone_root() {
        let all = [
            ProcessInfo {
                pid: 20,
                parent: 7,
                name: "cmd.exe".into(),
            },
            ProcessInfo {
                pid: 30,
                parent: 20,
                name: "child.exe".into(),
            },
            ProcessInfo {
                pid: 40,
                parent: 2,
                name: "other.exe".into(),
            },
        ];
        let family = family_of(7, &all);
        assert_eq!(family.len(), 3);
        assert!(family.iter().any(|process| process.pid == 20));
        assert!(family.iter().any(|process| process.pid == 30));
        assert!(!family.iter().any(|process| process.pid == 40));
    }

    #[test]
    fn test_unknown_pid_fails_on_the_first_attempt() {
        let started = std::time::Instant::now();
        let result = find_console_window(u32::MAX);
        assert!(matches!(
            result,
            Err(LookupError::NoSuchProcess { pid: u32::MAX })
        ));
        assert!(started.elapsed() < LOOKUP_RETRY_INTERVAL);
    }

    #[test]
    fn test_match_prefers_visible_window() {
        let family = [ProcessInfo {
            pid: 7,
            parent: 1,
            name: "cmd.exe".into(),
        }];
        let windows = [
            WindowInfo {
                hwnd: HWND(std::ptr::null_mut()),
                pid: 7,
                title: "hidden".into(),
                visible: false,
            },
            WindowInfo {
                hwnd: HWND(std::ptr::null_mut()),
                pid: 7,
                title: "shown".into(),
                visible: true,
            },
        ];
        let found = match_window(&family, &windows).unwrap();
        assert_eq!(found.title, "shown");

        // Without a visible candidate the hidden one still matches
        let found = match_window(&family, &windows[..1]).unwrap();
        assert_eq!(found.title, "hidden");
    }

    #[test]
    fn test_no_match_for_foreign_pid() {
        let family = [ProcessInfo {
            pid: 7,
            parent: 1,
            name: "cmd.exe".into(),
        }];
        let windows = [WindowInfo {
            hwnd: HWND(std::ptr::null_mut()),
            pid: 8,
            title: "other".into(),
            visible: true,
        }];
        assert!(match_window(&family, &windows).is_none());
    }

    #[test]
    fn test_utf16_truncates_at_nul() {
        let mut buffer = [0u16; 8];
        for (i, c) in "cmd.exe".encode_utf16().enumerate() {
            buffer[i] = c;
        }
        assert_eq!(utf16_until_nul(&buffer), "cmd.exe");
        assert_eq!(utf16_until_nul(&[0u16; 4]), "");
    }
}
