//! Console attachment and resizing
//!
//! Attaches to the target process's console, owns the screen-buffer handle,
//! and applies resize plans. Attachment is scoped: however the session ends,
//! the console is detached and every handle closed.

use std::io::{self, Write};

use thiserror::Error;
use tracing::{debug, info};

use windows::core::w;
use windows::Win32::Foundation::{
    CloseHandle, BOOL, GENERIC_READ, GENERIC_WRITE, HANDLE, HWND, RECT, WAIT_TIMEOUT,
};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Console::{
    AttachConsole, FreeConsole, GetConsoleScreenBufferInfo, SetConsoleCtrlHandler,
    SetConsoleScreenBufferSize, SetConsoleWindowInfo, CONSOLE_SCREEN_BUFFER_INFO, COORD,
    CTRL_BREAK_EVENT, CTRL_CLOSE_EVENT, CTRL_C_EVENT, SMALL_RECT,
};
use windows::Win32::System::Threading::{
    OpenProcess, WaitForSingleObject, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SYNCHRONIZE,
};
use windows::Win32::UI::WindowsAndMessaging::{
    GetClientRect, GetWindowRect, SetWindowPos, ShowWindow, SWP_NOACTIVATE, SWP_NOREDRAW,
    SWP_NOZORDER, SW_HIDE,
};

use crate::geometry::{self, ConsoleMetrics, GeometryError, PixelSize, ResizeStep};
use crate::protocol::ResizeCommand;

/// One resize pass can leave the window a cell off; a second pass settles it.
const RESIZE_ITERATIONS: u32 = 2;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("Failed to open target process {pid}: {source}")]
    OpenProcess {
        pid: u32,
        #[source]
        source: windows::core::Error,
    },

    #[error("Failed to attach to console of process {pid}: {source}")]
    Attach {
        pid: u32,
        #[source]
        source: windows::core::Error,
    },

    #[error("Failed to open console screen buffer: {0}")]
    OpenBuffer(#[source] windows::core::Error),

    #[error("Failed to read console screen buffer info: {0}")]
    BufferInfo(#[source] windows::core::Error),

    #[error("Failed to read window rectangle: {0}")]
    WindowRect(#[source] windows::core::Error),

    #[error("Failed to write progress output: {0}")]
    Output(#[source] io::Error),

    #[error("Invalid console geometry: {0}")]
    Geometry(#[from] GeometryError),
}

pub type Result<T> = std::result::Result<T, ConsoleError>;

/// Interrupt, break, and close events belong to the child's console; the
/// bridge must stay alive through them.
unsafe extern "system" fn swallow_console_ctrl(event: u32) -> BOOL {
    matches!(event, CTRL_C_EVENT | CTRL_BREAK_EVENT | CTRL_CLOSE_EVENT).into()
}

/// An attached console session for one target process.
///
/// Holds the process handle (liveness), the window handle (pixel geometry),
/// and the screen-buffer handle (cell geometry). Dropping the session closes
/// every handle and detaches from the console.
pub struct ConsoleSession {
    pid: u32,
    process: HANDLE,
    hwnd: HWND,
    buffer: HANDLE,
}

impl ConsoleSession {
    /// Hide the target window and take over its console.
    ///
    /// The bridge's own console, if any, is released first because a process
    /// can only be attached to one console. The screen buffer is opened
    /// through `CONOUT$`: the standard output handle of this process is the
    /// host's pipe, not the console.
    pub fn attach(pid: u32, hwnd: HWND) -> Result<Self> {
        unsafe {
            let process = OpenProcess(
                PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_SYNCHRONIZE,
                false,
                pid,
            )
            .map_err(|source| ConsoleError::OpenProcess { pid, source })?;

            // Hidden, the window can be repositioned without flicker
            let _ = ShowWindow(hwnd, SW_HIDE);

            let _ = FreeConsole();
            if let Err(source) = AttachConsole(pid) {
                let _ = CloseHandle(process);
                return Err(ConsoleError::Attach { pid, source });
            }

            let buffer = match CreateFileW(
                w!("CONOUT$"),
                GENERIC_READ.0 | GENERIC_WRITE.0,
                FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_FLAGS_AND_ATTRIBUTES(0),
                None,
            ) {
                Ok(handle) => handle,
                Err(source) => {
                    let _ = FreeConsole();
                    let _ = CloseHandle(process);
                    return Err(ConsoleError::OpenBuffer(source));
                }
            };

            let _ = SetConsoleCtrlHandler(Some(swallow_console_ctrl), true);

            info!(pid, "attached to console");
            Ok(Self {
                pid,
                process,
                hwnd,
                buffer,
            })
        }
    }

    /// Whether the target process is still running. A zero-timeout wait
    /// times out exactly when the process has not signaled.
    pub fn process_running(&self) -> bool {
        unsafe { WaitForSingleObject(self.process, 0) == WAIT_TIMEOUT }
    }

    /// Apply one resize command.
    ///
    /// Geometry is re-read fresh each iteration and the setter order depends
    /// on the grow or shrink direction per axis. Individual setters are
    /// best-effort; the console can reject one step while the rest still
    /// land, and the second iteration cleans up after it.
    pub fn apply(&self, command: &ResizeCommand) -> Result<()> {
        for iteration in 1..=RESIZE_ITERATIONS {
            let metrics = self.read_metrics()?;
            let pixels = geometry::target_pixel_size(&metrics, command)?;
            // Progress shares the host pipe; a closed pipe must not panic
            writeln!(
                io::stdout(),
                "pixel size (iteration {}): ({}, {})",
                iteration,
                pixels.width,
                pixels.height
            )
            .map_err(ConsoleError::Output)?;
            for step in geometry::plan_resize(&metrics, command)? {
                if let Err(error) = self.perform(&step) {
                    debug!(%error, ?step, "resize step rejected");
                }
            }
        }
        Ok(())
    }

    fn read_metrics(&self) -> Result<ConsoleMetrics> {
        let mut info = CONSOLE_SCREEN_BUFFER_INFO::default();
        unsafe { GetConsoleScreenBufferInfo(self.buffer, &mut info) }
            .map_err(ConsoleError::BufferInfo)?;

        let mut window = RECT::default();
        unsafe { GetWindowRect(self.hwnd, &mut window) }.map_err(ConsoleError::WindowRect)?;
        let mut content = RECT::default();
        unsafe { GetClientRect(self.hwnd, &mut content) }.map_err(ConsoleError::WindowRect)?;

        // Cell counts come from the visible window rectangle, not the buffer
        Ok(ConsoleMetrics {
            cell_columns: (info.srWindow.Right - info.srWindow.Left + 1).max(0) as u16,
            cell_rows: (info.srWindow.Bottom - info.srWindow.Top + 1).max(0) as u16,
            content: PixelSize {
                width: content.right - content.left,
                height: content.bottom - content.top,
            },
            window: PixelSize {
                width: window.right - window.left,
                height: window.bottom - window.top,
            },
        })
    }

    fn perform(&self, step: &ResizeStep) -> windows::core::Result<()> {
        match *step {
            // The window is hidden; it is parked at the origin while resized
            ResizeStep::PositionWindow(PixelSize { width, height }) => unsafe {
                SetWindowPos(
                    self.hwnd,
                    None,
                    0,
                    0,
                    width,
                    height,
                    SWP_NOACTIVATE | SWP_NOREDRAW | SWP_NOZORDER,
                )
            },
            ResizeStep::SetBufferSize { columns, rows } => unsafe {
                SetConsoleScreenBufferSize(
                    self.buffer,
                    COORD {
                        X: columns as i16,
                        Y: rows as i16,
                    },
                )
            },
            ResizeStep::SetWindowRect { columns, rows } => unsafe {
                SetConsoleWindowInfo(
                    self.buffer,
                    true,
                    &SMALL_RECT {
                        Left: 0,
                        Top: 0,
                        Right: (columns as i32 - 1) as i16,
                        Bottom: (rows as i32 - 1) as i16,
                    },
                )
            },
        }
    }
}

impl Drop for ConsoleSession {
    fn drop(&mut self) {
        unsafe {
            let _ = SetConsoleCtrlHandler(Some(swallow_console_ctrl), false);
            let _ = CloseHandle(self.buffer);
            let _ = FreeConsole();
            let _ = CloseHandle(self.process);
        }
        debug!(pid = self.pid, "detached from console");
    }
}
