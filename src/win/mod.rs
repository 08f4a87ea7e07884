//! Windows side of the bridge
//!
//! There is no pty to own here; the hosted child already runs in a real
//! console window. The bridge finds that window, takes the console over,
//! and keeps its geometry in step with the host:
//!
//! ```text
//!   stdin ─pid─► lookup (bounded retries) ─window─► hide + attach
//!                                                        │
//!   stdin ─"<rows>x<columns>"─────────────────────► resize loop
//!                                          (buffer and window setters,
//!                                           direction-aware order, twice)
//! ```
//!
//! The loop ends when the target process exits or stdin closes; every exit
//! path detaches from the console and closes the handles.

mod bridge;
mod console;
mod lookup;

pub use bridge::run;
