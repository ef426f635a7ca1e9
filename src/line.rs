//! Line entity: the resource handle and its state machine.
//!
//! ```text
//!  Unopened ──open ok──▶ Active ──last release / shutdown──▶ Closing ──▶ Closed
//!      │                                                               ▲
//!      └──────────────────────── open failed ──────────────────────────┘
//! ```
//!
//! Every field that changes over a line's life sits in [`LineInner`] behind
//! the line's own mutex. Owner counting, the hardware handle, the logical
//! state and the phase are therefore only ever mutated together, and a
//! request racing with the last release either joins the line before the
//! count reached zero or finds it gone from the registry.
//!
//! The owner gate is unhooked: the line acts on the [`Transition`] returned by
//! `delete`/`shutdown` while it still holds its lock, which is where the
//! teardown sequence runs.
//!
//! Lock order: line lock, then chip lock or hub lock. The registry lock is a
//! leaf and the line lock is never taken while holding another line's lock.

use crate::chip::Chip;
use crate::controller::Shared;
use linegate_core::driver::{EdgeCallback, EdgeEvent, LineHandle};
use linegate_core::error::{LineError, LineResult};
use linegate_core::event_hub::{EventHub, SubscriberId, Subscription};
use linegate_core::ref_gate::{GateOptions, NoHook, RefGate, Transition};
use linegate_core::types::{Level, LineConfig, LineEvent, LineInfo, LineKey, Mode, State};
use parking_lot::{Mutex, MutexGuard};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace};

/// Lifecycle phase of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Unopened,
    Active,
    Closing,
    Closed,
}

/// Mutable part of a line, guarded by the line lock.
pub(crate) struct LineInner {
    pub(crate) phase: Phase,
    state: State,
    gate: RefGate,
    handle: Option<Box<dyn LineHandle>>,
}

/// One requested hardware line shared by any number of owners.
pub struct Line {
    key: LineKey,
    config: LineConfig,
    consumer: String,
    chip: Weak<Chip>,
    hub: Arc<EventHub<LineEvent>>,
    all_events: Arc<EventHub<LineEvent>>,
    inner: Mutex<LineInner>,
}

impl std::fmt::Debug for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Line")
            .field("key", &self.key)
            .field("mode", &self.config.mode())
            .field("phase", &inner.phase)
            .field("state", &inner.state)
            .field("owners", &inner.gate.count())
            .finish()
    }
}

impl Line {
    /// A line in the `Unopened` phase, not yet visible to anyone.
    pub(crate) fn new(
        key: LineKey,
        config: LineConfig,
        chip: &Arc<Chip>,
        shared: &Shared,
    ) -> LineResult<Arc<Line>> {
        let mut gate_options = GateOptions::default();
        if let Some(limit) = shared.options.max_owners {
            gate_options = gate_options.with_limit(limit);
        }
        let gate = RefGate::with_options(NoHook, gate_options)
            .map_err(|err| LineError::InvalidConfiguration(err.to_string()))?;

        Ok(Arc::new(Line {
            hub: Arc::new(EventHub::new(key.to_string(), shared.options.watcher_capacity)),
            all_events: shared.events.clone(),
            consumer: chip.consumer().to_string(),
            chip: Arc::downgrade(chip),
            key,
            config,
            inner: Mutex::new(LineInner {
                phase: Phase::Unopened,
                state: State::Inactive,
                gate,
                handle: None,
            }),
        }))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, LineInner> {
        self.inner.lock()
    }

    /// Claim the hardware line and take the first ownership.
    pub(crate) fn open(self: &Arc<Self>, inner: &mut LineInner, chip: &Chip) -> LineResult<()> {
        debug_assert_eq!(inner.phase, Phase::Unopened);
        let on_edge = match self.config.mode() {
            Mode::Input => Some(self.edge_callback()),
            Mode::Output => None,
        };
        let handle = chip.request_line(self.key.offset, self.config, on_edge)?;
        inner.handle = Some(handle);
        inner.state = self.config.initial_state();
        inner.phase = Phase::Active;
        let transition = inner.gate.add();
        debug_assert_eq!(transition, Some(Transition::Activated));
        info!(
            chip = %self.key.chip,
            offset = self.key.offset,
            mode = %self.config.mode(),
            state = %inner.state,
            "Line opened"
        );
        Ok(())
    }

    /// Take another ownership of an active line requested with `requested`.
    ///
    /// Only the mode has to match; pull and initial state of later requests
    /// are ignored.
    pub(crate) fn join(&self, inner: &mut LineInner, requested: LineConfig) -> LineResult<()> {
        debug_assert_eq!(inner.phase, Phase::Active);
        let existing = self.config.mode();
        if requested.mode() != existing {
            return Err(LineError::DirectionConflict {
                chip: self.key.chip.clone(),
                offset: self.key.offset,
                existing,
                requested: requested.mode(),
            });
        }
        if inner.gate.is_saturated() {
            return Err(LineError::OwnerLimitReached {
                chip: self.key.chip.clone(),
                offset: self.key.offset,
                limit: inner.gate.limit(),
            });
        }
        inner.gate.add();
        debug!(
            chip = %self.key.chip,
            offset = self.key.offset,
            owners = inner.gate.count(),
            "Line joined"
        );
        Ok(())
    }

    /// Drop one ownership; the last one tears the line down.
    pub(crate) fn release(self: &Arc<Self>, shared: &Shared) -> LineResult<()> {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Active {
            return Ok(());
        }
        match inner.gate.delete() {
            Some(Transition::Deactivated) => self.teardown(inner, shared),
            _ => {
                debug!(
                    chip = %self.key.chip,
                    offset = self.key.offset,
                    owners = inner.gate.count(),
                    "Line released"
                );
                Ok(())
            }
        }
    }

    /// Tear the line down regardless of remaining owners. Idempotent.
    pub(crate) fn shutdown(self: &Arc<Self>, shared: &Shared) -> LineResult<()> {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Active {
            return Ok(());
        }
        inner.gate.shutdown();
        self.teardown(inner, shared)
    }

    /// Runs with the line lock held until the registry entry is gone.
    fn teardown(self: &Arc<Self>, mut inner: MutexGuard<'_, LineInner>, shared: &Shared) -> LineResult<()> {
        inner.phase = Phase::Closing;
        let mut errors = Vec::new();

        if self.config.mode() == Mode::Output && inner.state == State::Active {
            if let Some(handle) = inner.handle.as_mut() {
                if let Err(err) = handle.write(Level::Low) {
                    errors.push(LineError::from(err));
                }
            }
        }
        if inner.state != State::Inactive {
            inner.state = State::Inactive;
            self.emit(LineEvent::now(&self.key, State::Inactive, false));
        }
        let closed_watchers = self.hub.cleanup();

        if let Some(handle) = inner.handle.take() {
            if let Err(err) = handle.close() {
                errors.push(LineError::from(err));
            }
        }
        inner.phase = Phase::Closed;
        shared.lines.remove_if_same(&self.key, self);
        drop(inner);

        if let Some(chip) = self.chip.upgrade() {
            if let Err(err) = chip.release(&shared.chips) {
                errors.push(err);
            }
        }

        if errors.is_empty() {
            info!(
                chip = %self.key.chip,
                offset = self.key.offset,
                watchers = closed_watchers,
                "Line closed"
            );
        } else {
            for err in &errors {
                error!(chip = %self.key.chip, offset = self.key.offset, error = %err, "Line teardown failed");
            }
        }
        LineError::aggregate(errors)
    }

    /// Drive an output line. The hardware write must succeed before the
    /// state changes and the event goes out.
    pub(crate) fn set_state(&self, state: State) -> LineResult<()> {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Active {
            return Err(self.closed_error());
        }
        if self.config.mode() != Mode::Output {
            return Err(LineError::NotAnOutput {
                chip: self.key.chip.clone(),
                offset: self.key.offset,
            });
        }
        if inner.state == state {
            return Ok(());
        }
        let handle = inner.handle.as_mut().ok_or_else(|| self.closed_error())?;
        handle.write(state.level())?;
        inner.state = state;
        self.emit(LineEvent::now(&self.key, state, false));
        Ok(())
    }

    /// Physical level read through the driver.
    pub(crate) fn read(&self) -> LineResult<Level> {
        let inner = self.inner.lock();
        match (inner.phase, inner.handle.as_ref()) {
            (Phase::Active, Some(handle)) => Ok(handle.read()?),
            _ => Err(self.closed_error()),
        }
    }

    /// Register a subscriber on an active line.
    pub(crate) fn subscribe(&self) -> LineResult<Subscription<LineEvent>> {
        let inner = self.inner.lock();
        if inner.phase != Phase::Active {
            return Err(self.closed_error());
        }
        self.hub.subscribe().ok_or_else(|| self.closed_error())
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.hub.unsubscribe(id)
    }

    pub(crate) fn hub(&self) -> &Arc<EventHub<LineEvent>> {
        &self.hub
    }

    pub(crate) fn info(&self) -> LineResult<LineInfo> {
        let inner = self.inner.lock();
        if inner.phase != Phase::Active {
            return Err(self.closed_error());
        }
        Ok(LineInfo {
            chip: self.key.chip.clone(),
            offset: self.key.offset,
            mode: self.config.mode(),
            pull: self.config.pull(),
            state: inner.state,
            owners: inner.gate.count(),
            consumer: self.consumer.clone(),
        })
    }

    /// Current logical state. A closed line reads as inactive.
    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    /// Number of logical owners.
    pub fn owners(&self) -> u32 {
        self.inner.lock().gate.count()
    }

    /// True once no owner holds the line any more.
    pub fn is_closed(&self) -> bool {
        !self.inner.lock().gate.state()
    }

    /// Registry key.
    pub fn key(&self) -> &LineKey {
        &self.key
    }

    /// Configuration the line was created with.
    pub fn config(&self) -> LineConfig {
        self.config
    }

    fn closed_error(&self) -> LineError {
        LineError::LineClosed {
            chip: self.key.chip.clone(),
            offset: self.key.offset,
        }
    }

    /// Broadcast a transition to this line's watchers and the controller-wide
    /// stream. Called with the line lock held.
    fn emit(&self, event: LineEvent) {
        let delivered = self.hub.broadcast(&event);
        self.all_events.broadcast(&event);
        debug!(
            chip = %event.chip,
            offset = event.offset,
            state = %event.state,
            edge = event.is_hardware_edge,
            watchers = delivered,
            "State changed"
        );
    }

    fn edge_callback(self: &Arc<Self>) -> EdgeCallback {
        let line = Arc::downgrade(self);
        Arc::new(move |event: EdgeEvent| {
            if let Some(line) = line.upgrade() {
                line.on_edge(event);
            }
        })
    }

    /// Driver edge on an input line, on the driver's thread.
    fn on_edge(&self, event: EdgeEvent) {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Active {
            trace!(chip = %self.key.chip, offset = self.key.offset, "Edge after close ignored");
            return;
        }
        let state = State::from(event.edge);
        if inner.state == state {
            return;
        }
        inner.state = state;
        self.emit(LineEvent {
            timestamp: event.timestamp,
            ..LineEvent::now(&self.key, state, true)
        });
    }
}
