//! Core types and primitives for linegate.
//!
//! This crate holds everything that does not need the registries:
//!
//! - [`types`]: `State`, `Mode`, `Pull`, `LineConfig`, `LineEvent`, ...
//! - [`error`]: `LineError`, `DriverError`, `AggregateCloseError`
//! - [`ref_gate`]: the threshold-triggered owner counter
//! - [`event_hub`]: fan-out broadcaster with per-subscriber FIFO queues
//! - [`driver`]: traits implemented by line drivers

pub mod driver;
pub mod error;
pub mod event_hub;
pub mod ref_gate;
pub mod types;

pub use driver::{ChipHandle, EdgeCallback, EdgeEvent, LineDriver, LineHandle};
pub use error::{
    AggregateCloseError, DriverError, DriverErrorKind, DriverResult, LineError, LineResult,
};
pub use event_hub::{EventHub, SubscriberId, Subscription, TryRecvError};
pub use ref_gate::{GateError, GateHook, GateOptions, NoHook, RefGate, Transition};
pub use types::{Edge, Level, LineConfig, LineEvent, LineInfo, LineKey, Mode, Pull, State};
