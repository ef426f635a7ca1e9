//! Line-driver collaborator traits.
//!
//! The controller never talks to hardware directly. A [`LineDriver`]
//! enumerates and opens chips; a [`ChipHandle`] claims individual lines; a
//! [`LineHandle`] reads, writes and releases one claimed line. Input lines
//! report hardware edges through an [`EdgeCallback`] that the driver invokes
//! on its own thread at arbitrary times.
//!
//! ```text
//! ┌──────────────┐ open_chip ┌──────────────┐ request_line ┌──────────────┐
//! │  LineDriver  │──────────▶│  ChipHandle  │─────────────▶│  LineHandle  │
//! └──────────────┘           └──────────────┘              └──────┬───────┘
//!                                                                 │ edges
//!                                                                 ▼
//!                                                          EdgeCallback(EdgeEvent)
//! ```
//!
//! All calls are synchronous: they may perform a syscall but never wait on
//! another line, nor on an edge callback in progress. Handles are closed by
//! value so a handle cannot be used after it was released.

use crate::error::DriverResult;
use crate::types::{Edge, Level, LineConfig};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A hardware edge reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    /// Offset of the line on its chip.
    pub offset: u32,
    /// Direction of the transition.
    pub edge: Edge,
    /// When the driver observed the edge.
    pub timestamp: DateTime<Utc>,
}

impl EdgeEvent {
    /// Edge stamped with the current time.
    pub fn now(offset: u32, edge: Edge) -> Self {
        Self {
            offset,
            edge,
            timestamp: Utc::now(),
        }
    }
}

/// Callback invoked by the driver, on its own thread, for every input edge.
pub type EdgeCallback = Arc<dyn Fn(EdgeEvent) + Send + Sync>;

/// Entry point of a line driver.
pub trait LineDriver: Send + Sync {
    /// Short driver name used in error messages (e.g. `"mock"`).
    fn driver_type(&self) -> &'static str;

    /// Names of the chips this driver can open.
    fn chip_names(&self) -> Vec<String>;

    /// Open a chip, tagging it with `consumer` for diagnostics.
    fn open_chip(&self, name: &str, consumer: &str) -> DriverResult<Box<dyn ChipHandle>>;
}

/// An open chip.
pub trait ChipHandle: Send {
    /// Chip name.
    fn name(&self) -> &str;

    /// Number of lines on this chip; valid offsets are `0..line_count()`.
    fn line_count(&self) -> u32;

    /// Claim one line.
    ///
    /// Inputs receive both edges through `on_edge`; outputs are driven to
    /// the configured initial level before this returns.
    fn request_line(
        &mut self,
        offset: u32,
        config: LineConfig,
        on_edge: Option<EdgeCallback>,
    ) -> DriverResult<Box<dyn LineHandle>>;

    /// Release the chip.
    fn close(self: Box<Self>) -> DriverResult<()>;
}

/// A claimed line.
pub trait LineHandle: Send {
    /// Offset of the line on its chip.
    fn offset(&self) -> u32;

    /// Current physical level.
    fn read(&self) -> DriverResult<Level>;

    /// Drive the line. Only valid for outputs.
    fn write(&mut self, level: Level) -> DriverResult<()>;

    /// Release the line and stop starting new edge callbacks.
    ///
    /// Called with the line's lock held, which edge callbacks also take, so
    /// this must not wait for a callback that is already running. Such a
    /// late callback may still complete after `close` returns; the line
    /// ignores it.
    fn close(self: Box<Self>) -> DriverResult<()>;
}
