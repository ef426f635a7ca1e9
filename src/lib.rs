//! # linegate
//!
//! Reference-counted, multiplexed ownership of shared hardware lines (GPIO
//! pins).
//!
//! A physical line can only be claimed once from the driver, yet several
//! independent components (an alarm module and a diagnostics module, say)
//! may need the same pin. `linegate` lets each of them request the line,
//! observe its transitions and release it; the hardware is claimed on the
//! first request and released on the last.
//!
//! ## Crate Structure
//!
//! - **`controller`**: [`LineController`], the facade owning both registries
//!   and the driver.
//! - **`line`** / **`chip`**: the entities behind the registries. Each keeps
//!   an owner count in a [`RefGate`] and opens its driver handle lazily.
//! - **`line_ref`**: [`LineRef`], one ownership of a line, released on
//!   `close()` or drop; `get_line` hands out non-owning views.
//! - **`watcher`**: [`Watcher`] (channel, async or blocking) and [`Listener`]
//!   (callback) subscriptions, both backed by an [`EventHub`].
//! - **`registry`**: the keyed stores with snapshot traversal.
//! - **`config`** / **`logging`**: Figment configuration and tracing setup.
//!
//! Core value types, errors and driver traits live in `linegate-core` and are
//! re-exported here.
//!
//! ## Concurrency
//!
//! The controller API is synchronous and thread-safe. Driver edge callbacks
//! arrive on the driver's own threads. Per-line transitions are totally
//! ordered by the line's lock, and every subscriber receives them in that
//! order.

pub mod chip;
pub mod config;
pub mod controller;
pub mod line;
pub mod line_ref;
pub mod logging;
pub mod registry;
pub mod watcher;

pub use controller::{ControllerOptions, LineController, DEFAULT_CONSUMER};
pub use line_ref::LineRef;
pub use registry::{ChipRegistry, LineRegistry, Registry, RegistryError};
pub use watcher::{Listener, Watcher, WatcherStream};

pub use linegate_core::driver::{ChipHandle, EdgeCallback, EdgeEvent, LineDriver, LineHandle};
pub use linegate_core::error::{
    AggregateCloseError, DriverError, DriverErrorKind, DriverResult, LineError, LineResult,
};
pub use linegate_core::event_hub::{EventHub, TryRecvError};
pub use linegate_core::ref_gate::RefGate;
pub use linegate_core::types::{
    Edge, Level, LineConfig, LineEvent, LineInfo, LineKey, Mode, Pull, State,
};
