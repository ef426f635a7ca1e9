//! Threshold-triggered reference counter.
//!
//! A [`RefGate`] tracks how many logical owners hold a resource and fires a
//! hook exactly when the count crosses the zero boundary:
//!
//! - `0 -> 1` fires the hook with `true` (activate: open the hardware handle)
//! - `1 -> 0` fires the hook with `false` (deactivate: close it)
//!
//! Adding to a positive count, or deleting from zero, never fires. All
//! mutation goes through [`RefGate::add`], [`RefGate::delete`] and
//! [`RefGate::shutdown`], so edge detection lives in one place.
//!
//! The gate itself is not synchronized: its owner serializes access (a
//! `Line` or `Chip` keeps its gate behind its own lock). For shared use, wrap
//! it in a `parking_lot::Mutex`.
//!
//! # Example
//!
//! ```
//! use linegate_core::ref_gate::{RefGate, Transition};
//!
//! let mut opened = 0;
//! let mut gate = RefGate::new(|active: bool| {
//!     if active {
//!         opened += 1;
//!     }
//! });
//!
//! assert_eq!(gate.add(), Some(Transition::Activated));
//! assert_eq!(gate.add(), None);
//! assert_eq!(gate.count(), 2);
//! gate.delete();
//! assert_eq!(gate.delete(), Some(Transition::Deactivated));
//! drop(gate);
//! assert_eq!(opened, 1);
//! ```

use thiserror::Error;

/// Called on every zero-boundary crossing with the new activation state.
pub trait GateHook {
    /// `true` on activation, `false` on deactivation.
    fn on_transition(&mut self, active: bool);
}

impl<F: FnMut(bool)> GateHook for F {
    fn on_transition(&mut self, active: bool) {
        self(active)
    }
}

/// Hook that does nothing, for owners that act on the returned [`Transition`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHook;

impl GateHook for NoHook {
    fn on_transition(&mut self, _active: bool) {}
}

/// A zero-boundary crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Count went from zero to positive.
    Activated,
    /// Count went from positive to zero.
    Deactivated,
}

/// Invalid gate options.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// A ceiling of zero could never activate.
    #[error("limit can not be 0")]
    ZeroLimit,
    /// The initial owner count exceeds the ceiling.
    #[error("initial owner count {initial} exceeds limit {limit}")]
    InitialAboveLimit {
        /// Requested initial count.
        initial: u32,
        /// Requested ceiling.
        limit: u32,
    },
}

/// Construction options for a [`RefGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOptions {
    /// Maximum owner count. Adds at the ceiling are no-ops.
    pub limit: u32,
    /// Owner count the gate starts with. A positive value activates immediately.
    pub initial: u32,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            limit: u32::MAX,
            initial: 0,
        }
    }
}

impl GateOptions {
    /// Set the ceiling.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Set the initial owner count.
    pub fn with_initial(mut self, initial: u32) -> Self {
        self.initial = initial;
        self
    }

    fn validate(&self) -> Result<(), GateError> {
        if self.limit == 0 {
            return Err(GateError::ZeroLimit);
        }
        if self.initial > self.limit {
            return Err(GateError::InitialAboveLimit {
                initial: self.initial,
                limit: self.limit,
            });
        }
        Ok(())
    }
}

/// Saturating owner counter with an activation hook.
pub struct RefGate<H = NoHook> {
    count: u32,
    limit: u32,
    active: bool,
    hook: H,
}

impl<H> std::fmt::Debug for RefGate<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefGate")
            .field("count", &self.count)
            .field("limit", &self.limit)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl RefGate<NoHook> {
    /// Gate without a hook; callers act on the returned transitions.
    pub fn unhooked() -> Self {
        RefGate::new(NoHook)
    }
}

impl<H: GateHook> RefGate<H> {
    /// Unbounded gate starting at zero owners.
    pub fn new(hook: H) -> Self {
        Self {
            count: 0,
            limit: u32::MAX,
            active: false,
            hook,
        }
    }

    /// Gate with a ceiling and/or a non-zero initial count.
    ///
    /// A positive initial count fires the activation hook before returning.
    pub fn with_options(hook: H, options: GateOptions) -> Result<Self, GateError> {
        options.validate()?;
        let mut gate = Self {
            count: options.initial,
            limit: options.limit,
            active: false,
            hook,
        };
        gate.check_transition();
        Ok(gate)
    }

    /// Add an owner. Saturates at the ceiling without error.
    pub fn add(&mut self) -> Option<Transition> {
        if self.count == self.limit {
            return None;
        }
        self.count += 1;
        self.check_transition()
    }

    /// Remove an owner. Saturates at zero.
    pub fn delete(&mut self) -> Option<Transition> {
        if self.count == 0 {
            return None;
        }
        self.count -= 1;
        self.check_transition()
    }

    /// Force the count to zero, deactivating if it was active.
    ///
    /// Only for whole-process teardown.
    pub fn shutdown(&mut self) -> Option<Transition> {
        if self.count == 0 {
            return None;
        }
        self.count = 0;
        self.check_transition()
    }

    /// True while at least one owner holds the gate.
    pub fn state(&self) -> bool {
        self.active
    }

    /// Current owner count.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Owner ceiling.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// True when another [`add`](Self::add) would be a no-op.
    pub fn is_saturated(&self) -> bool {
        self.count == self.limit
    }

    fn check_transition(&mut self) -> Option<Transition> {
        let active = self.count > 0;
        if active == self.active {
            return None;
        }
        self.active = active;
        self.hook.on_transition(active);
        debug_assert_eq!(self.active, self.count > 0);
        Some(if active {
            Transition::Activated
        } else {
            Transition::Deactivated
        })
    }
}
