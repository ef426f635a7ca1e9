//! Handle to a requested line.
//!
//! Every successful `request_line` returns a [`LineRef`] that holds exactly
//! one ownership of the line. Releasing it happens once, either through
//! [`LineRef::close`] or when the handle is dropped; the last release tears
//! the line down. `get_line` hands out a non-owning view instead, whose
//! close and drop release nothing.

use crate::controller::Shared;
use crate::line::Line;
use crate::watcher::{Listener, Watcher};
use linegate_core::error::{LineError, LineResult};
use linegate_core::types::{Level, LineConfig, LineEvent, LineInfo, LineKey, Mode, State};
use std::sync::Arc;
use tracing::error;

/// One ownership of a shared line, or a view of it.
pub struct LineRef {
    line: Arc<Line>,
    shared: Arc<Shared>,
    owning: bool,
    released: bool,
}

impl std::fmt::Debug for LineRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineRef")
            .field("line", &self.line)
            .field("owning", &self.owning)
            .field("released", &self.released)
            .finish()
    }
}

impl LineRef {
    pub(crate) fn new(line: Arc<Line>, shared: Arc<Shared>) -> Self {
        Self {
            line,
            shared,
            owning: true,
            released: false,
        }
    }

    pub(crate) fn view(line: Arc<Line>, shared: Arc<Shared>) -> Self {
        Self {
            line,
            shared,
            owning: false,
            released: false,
        }
    }

    /// Release this ownership. A no-op for views.
    ///
    /// When it was the last one, the line is torn down: an active output is
    /// driven low, watchers are closed, the driver handle is released and the
    /// chip is released in turn. Teardown failures come back as
    /// [`LineError::AggregateClose`].
    pub fn close(mut self) -> LineResult<()> {
        self.release()
    }

    fn release(&mut self) -> LineResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        if !self.owning {
            return Ok(());
        }
        self.line.release(&self.shared)
    }

    /// False for the views returned by `get_line`.
    pub fn is_owning(&self) -> bool {
        self.owning
    }

    /// True when both handles refer to the same line instance.
    pub fn ptr_eq(&self, other: &LineRef) -> bool {
        Arc::ptr_eq(&self.line, &other.line)
    }

    /// True when this handle no longer refers to a live line, either because
    /// it was closed or because the line was torn down.
    pub fn is_closed(&self) -> bool {
        self.released || self.line.is_closed()
    }

    /// Chip name and offset.
    pub fn key(&self) -> &LineKey {
        self.line.key()
    }

    /// Chip name.
    pub fn chip(&self) -> &str {
        &self.line.key().chip
    }

    /// Offset on the chip.
    pub fn offset(&self) -> u32 {
        self.line.key().offset
    }

    /// Mode the line was created with.
    pub fn mode(&self) -> Mode {
        self.line.config().mode()
    }

    /// Configuration the line was created with, which may differ from the one
    /// this handle was requested with in everything but the mode.
    pub fn config(&self) -> LineConfig {
        self.line.config()
    }

    /// Current logical state.
    pub fn state(&self) -> State {
        self.line.state()
    }

    /// Number of owners of the line, this one included.
    pub fn owners(&self) -> u32 {
        self.line.owners()
    }

    /// Drive the line; see [`LineController::set_state`](crate::LineController::set_state).
    pub fn set_state(&self, state: State) -> LineResult<()> {
        self.check_open()?;
        self.line.set_state(state)
    }

    /// Physical level read through the driver.
    pub fn read(&self) -> LineResult<Level> {
        self.check_open()?;
        self.line.read()
    }

    /// Snapshot of the line.
    pub fn info(&self) -> LineResult<LineInfo> {
        self.check_open()?;
        self.line.info()
    }

    /// Non-owning watcher on this line.
    pub fn watch(&self) -> LineResult<Watcher> {
        self.check_open()?;
        Watcher::subscribe(&self.line, None)
    }

    /// Run `callback` for every event of this line, in order, on a dedicated
    /// thread. The listener ends when closed or when the line is torn down.
    pub fn on_event<F>(&self, callback: F) -> LineResult<Listener>
    where
        F: FnMut(LineEvent) + Send + 'static,
    {
        self.check_open()?;
        Listener::spawn(&self.line, callback)
    }

    /// Turn this handle into a watcher that closes it when closed.
    pub fn into_watcher(self) -> LineResult<Watcher> {
        self.check_open()?;
        let line = self.line.clone();
        Watcher::subscribe(&line, Some(self))
    }

    fn check_open(&self) -> LineResult<()> {
        if self.released {
            return Err(LineError::LineClosed {
                chip: self.chip().to_string(),
                offset: self.offset(),
            });
        }
        Ok(())
    }
}

impl Drop for LineRef {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            error!(line = %self.line.key(), error = %err, "Release on drop failed");
        }
    }
}
