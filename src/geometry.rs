//! Pixel geometry for console resizing
//!
//! Pure arithmetic behind the resize procedure: linear cell-to-pixel scaling
//! that preserves window chrome, and the ordered setter plan the console
//! resizer executes. The plan is plain data so its ordering rules can be
//! exercised without touching any platform API.

use thiserror::Error;

use crate::protocol::ResizeCommand;

#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("Cannot scale {axis} from a zero-cell extent")]
    ZeroCells { axis: &'static str },
}

pub type Result<T> = std::result::Result<T, GeometryError>;

/// An absolute pixel extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelSize {
    pub width: i32,
    pub height: i32,
}

/// Snapshot of the console's current geometry.
///
/// Taken fresh for every resize request; the window can change out of band,
/// so nothing here may be cached across requests.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleMetrics {
    pub cell_columns: u16,
    pub cell_rows: u16,
    /// Content (client) area in pixels, the part that actually holds cells.
    pub content: PixelSize,
    /// Full window frame in pixels, including chrome around the content.
    pub window: PixelSize,
}

/// A single abstract mutation in a resize plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeStep {
    /// Resize the native window frame to an absolute pixel size.
    PositionWindow(PixelSize),
    /// Set the screen-buffer cell size.
    SetBufferSize { columns: u16, rows: u16 },
    /// Set the visible window rectangle, in cells anchored at the origin.
    SetWindowRect { columns: u16, rows: u16 },
}

/// Compute the pixel size the window frame must adopt for `target` cells.
///
/// Each axis scales the content area by the cell ratio and adds back the
/// chrome (frame minus content), so borders and title bar keep their size.
/// The compute order is columns-then-rows even though the wire format is
/// rows-then-columns; named fields carry the distinction.
pub fn target_pixel_size(current: &ConsoleMetrics, target: &ResizeCommand) -> Result<PixelSize> {
    let width = scale_axis(
        current.content.width,
        current.window.width,
        current.cell_columns,
        target.columns,
        "columns",
    )?;
    let height = scale_axis(
        current.content.height,
        current.window.height,
        current.cell_rows,
        target.rows,
        "rows",
    )?;
    Ok(PixelSize { width, height })
}

fn scale_axis(
    content_px: i32,
    window_px: i32,
    old_cells: u16,
    target_cells: u16,
    axis: &'static str,
) -> Result<i32> {
    if old_cells == 0 {
        return Err(GeometryError::ZeroCells { axis });
    }
    let scaled = (content_px as f64 * target_cells as f64 / old_cells as f64).round() as i32;
    Ok(scaled + (window_px - content_px))
}

/// Build the ordered setter plan for one resize iteration.
///
/// The native frame is adjusted first; it is only approximate (but the sole
/// step that reaches an alternate screen buffer). The buffer and rectangle
/// steps then make the cell geometry exact: columns at the old row extent,
/// then rows at the final extent. Per axis the order depends on direction,
/// because the visible rectangle may never exceed the buffer at any
/// intermediate step: a growing buffer is set before the rectangle, a
/// shrinking rectangle before the buffer.
pub fn plan_resize(current: &ConsoleMetrics, target: &ResizeCommand) -> Result<Vec<ResizeStep>> {
    let pixels = target_pixel_size(current, target)?;
    let mut steps = Vec::with_capacity(5);

    steps.push(ResizeStep::PositionWindow(pixels));
    push_axis_steps(
        &mut steps,
        target.columns > current.cell_columns,
        ResizeStep::SetBufferSize {
            columns: target.columns,
            rows: current.cell_rows,
        },
        ResizeStep::SetWindowRect {
            columns: target.columns,
            rows: current.cell_rows,
        },
    );
    push_axis_steps(
        &mut steps,
        target.rows > current.cell_rows,
        ResizeStep::SetBufferSize {
            columns: target.columns,
            rows: target.rows,
        },
        ResizeStep::SetWindowRect {
            columns: target.columns,
            rows: target.rows,
        },
    );

    Ok(steps)
}

fn push_axis_steps(steps: &mut Vec<ResizeStep>, growing: bool, buffer: ResizeStep, window: ResizeStep) {
    if growing {
        steps.push(buffer);
        steps.push(window);
    } else {
        steps.push(window);
        steps.push(buffer);
    }
}
