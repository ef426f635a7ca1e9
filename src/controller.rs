//! The line controller facade.
//!
//! [`LineController`] is the only entry point application code needs. It owns
//! the two registries, the driver and the controller-wide event hub; cloning
//! it is cheap and every clone manages the same lines. There are no
//! process-wide singletons: two controllers over two drivers are fully
//! independent.
//!
//! # Example
//!
//! ```
//! use linegate::{LineConfig, LineController, ControllerOptions, State};
//! use linegate_driver_mock::MockDriver;
//! use std::sync::Arc;
//!
//! let driver = MockDriver::default();
//! let controller = LineController::new(Arc::new(driver.clone()), ControllerOptions::default());
//!
//! let alarm = controller.request_line("gpiochip0", 17, LineConfig::output(State::Inactive))?;
//! let diagnostics = controller.request_line("gpiochip0", 17, LineConfig::output(State::Inactive))?;
//! assert!(alarm.ptr_eq(&diagnostics));
//!
//! controller.set_state("gpiochip0", 17, State::Active)?;
//! alarm.close()?;
//! assert!(driver.is_claimed("gpiochip0", 17));
//! diagnostics.close()?;
//! assert!(!driver.is_claimed("gpiochip0", 17));
//! # Ok::<(), linegate::LineError>(())
//! ```

use crate::chip::Chip;
use crate::config::LinegateConfig;
use crate::line::{Line, Phase};
use crate::line_ref::LineRef;
use crate::registry::{ChipRegistry, LineRegistry};
use crate::watcher::Watcher;
use linegate_core::driver::LineDriver;
use linegate_core::error::{LineError, LineResult};
use linegate_core::event_hub::{EventHub, DEFAULT_CAPACITY};
use linegate_core::types::{LineConfig, LineEvent, LineKey, State};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Consumer tag used when none is configured.
pub const DEFAULT_CONSUMER: &str = "linegate";

/// Controller settings, also the `[controller]` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerOptions {
    /// Consumer tag passed to the driver when opening chips.
    #[serde(default = "default_consumer")]
    pub consumer: String,
    /// Per-subscriber event queue depth.
    #[serde(default = "default_watcher_capacity")]
    pub watcher_capacity: usize,
    /// Maximum number of owners per line. Unbounded when absent.
    #[serde(default)]
    pub max_owners: Option<u32>,
}

fn default_consumer() -> String {
    DEFAULT_CONSUMER.to_string()
}

fn default_watcher_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            consumer: default_consumer(),
            watcher_capacity: default_watcher_capacity(),
            max_owners: None,
        }
    }
}

/// State shared by the controller, its line handles and watchers.
pub(crate) struct Shared {
    pub(crate) driver: Arc<dyn LineDriver>,
    pub(crate) options: ControllerOptions,
    pub(crate) lines: LineRegistry,
    pub(crate) chips: ChipRegistry,
    pub(crate) events: Arc<EventHub<LineEvent>>,
    line_counts: Mutex<HashMap<String, u32>>,
    shut_down: AtomicBool,
}

enum Created {
    Line(Arc<Line>),
    /// Someone registered the key first; the chip ownership is handed back.
    Raced(Arc<Chip>),
}

impl Shared {
    fn release_chip(&self, chip: &Arc<Chip>) {
        if let Err(err) = chip.release(&self.chips) {
            error!(chip = chip.name(), error = %err, "Chip release failed");
        }
    }

    /// Validate the offset against the chip's cached line count.
    ///
    /// On a cache miss the chip is opened to learn its size, and that
    /// ownership is returned so the caller does not reopen it.
    fn check_offset(&self, key: &LineKey) -> LineResult<Option<Arc<Chip>>> {
        let cached = self.line_counts.lock().get(&key.chip).copied();
        if let Some(line_count) = cached {
            return if key.offset < line_count {
                Ok(None)
            } else {
                Err(invalid_offset(key, line_count))
            };
        }

        if !self.driver.chip_names().iter().any(|name| *name == key.chip) {
            return Err(LineError::ChipNotFound {
                chip: key.chip.clone(),
            });
        }
        let chip = Chip::acquire(&self.chips, &*self.driver, &key.chip, &self.options.consumer)?;
        let line_count = chip.line_count();
        self.line_counts.lock().insert(key.chip.clone(), line_count);
        if key.offset < line_count {
            Ok(Some(chip))
        } else {
            self.release_chip(&chip);
            Err(invalid_offset(key, line_count))
        }
    }

    /// Build, register and open a new line. Consumes one chip ownership,
    /// which moves into the line on success.
    fn create_line(&self, key: &LineKey, config: LineConfig, chip: Arc<Chip>) -> LineResult<Created> {
        let line = match Line::new(key.clone(), config, &chip, self) {
            Ok(line) => line,
            Err(err) => {
                self.release_chip(&chip);
                return Err(err);
            }
        };
        let mut inner = line.lock();
        if self.lines.add(key.clone(), line.clone()).is_err() {
            drop(inner);
            return Ok(Created::Raced(chip));
        }
        // Registered before this check, so a shutdown that set the flag
        // afterwards finds the line in its snapshot and waits on its lock.
        if self.shut_down.load(Ordering::SeqCst) {
            inner.phase = Phase::Closed;
            self.lines.remove_if_same(key, &line);
            drop(inner);
            self.release_chip(&chip);
            debug!(chip = %key.chip, offset = key.offset, "Request abandoned by shutdown");
            return Err(LineError::LineClosed {
                chip: key.chip.clone(),
                offset: key.offset,
            });
        }
        match line.open(&mut inner, &chip) {
            Ok(()) => {
                drop(inner);
                Ok(Created::Line(line))
            }
            Err(err) => {
                inner.phase = Phase::Closed;
                self.lines.remove_if_same(key, &line);
                drop(inner);
                self.release_chip(&chip);
                warn!(chip = %key.chip, offset = key.offset, error = %err, "Line request failed");
                Err(err)
            }
        }
    }

    fn lookup(&self, chip: &str, offset: u32) -> LineResult<Arc<Line>> {
        self.lines
            .get(&LineKey::new(chip, offset))
            .map_err(|_| LineError::LineNotFound {
                chip: chip.to_string(),
                offset,
            })
    }
}

fn invalid_offset(key: &LineKey, line_count: u32) -> LineError {
    LineError::InvalidOffset {
        chip: key.chip.clone(),
        offset: key.offset,
        line_count,
    }
}

/// Multiplexes requests for shared hardware lines onto single driver handles.
#[derive(Clone)]
pub struct LineController {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineController")
            .field("driver", &self.shared.driver.driver_type())
            .field("options", &self.shared.options)
            .field("lines", &self.shared.lines.len())
            .field("chips", &self.shared.chips.len())
            .finish()
    }
}

impl LineController {
    /// Controller over `driver`.
    ///
    /// An empty consumer tag falls back to [`DEFAULT_CONSUMER`], a zero
    /// capacity to one event, and a zero owner ceiling to unbounded.
    pub fn new(driver: Arc<dyn LineDriver>, mut options: ControllerOptions) -> Self {
        if options.consumer.is_empty() {
            options.consumer = default_consumer();
        }
        options.watcher_capacity = options.watcher_capacity.max(1);
        if options.max_owners == Some(0) {
            warn!("max_owners = 0 would reject every request, using unbounded");
            options.max_owners = None;
        }
        info!(
            driver = driver.driver_type(),
            consumer = %options.consumer,
            watcher_capacity = options.watcher_capacity,
            "Line controller created"
        );
        Self {
            shared: Arc::new(Shared {
                events: Arc::new(EventHub::new("all", options.watcher_capacity)),
                driver,
                options,
                lines: LineRegistry::new("lines"),
                chips: ChipRegistry::new("chips"),
                line_counts: Mutex::new(HashMap::new()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Controller using the `[controller]` section of a loaded configuration.
    pub fn from_config(driver: Arc<dyn LineDriver>, config: &LinegateConfig) -> Self {
        Self::new(driver, config.controller.clone())
    }

    /// Effective settings.
    pub fn options(&self) -> &ControllerOptions {
        &self.shared.options
    }

    /// Chips the driver can open.
    pub fn chips(&self) -> Vec<String> {
        self.shared.driver.chip_names()
    }

    /// Keys of every live line, in order.
    pub fn lines(&self) -> Vec<LineKey> {
        self.shared
            .lines
            .snapshot()
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }

    /// Take one ownership of a line, opening it on first request.
    ///
    /// Later requests must use the same mode; their pull and initial state
    /// are ignored. Validation failures create nothing, and a driver failure
    /// while opening leaves no trace in either registry.
    pub fn request_line(&self, chip: &str, offset: u32, config: LineConfig) -> LineResult<LineRef> {
        let shared = &self.shared;
        let key = LineKey::new(chip, offset);
        if shared.shut_down.load(Ordering::SeqCst) {
            return Err(LineError::LineClosed {
                chip: key.chip,
                offset,
            });
        }
        let mut held_chip = shared.check_offset(&key)?;

        let result = loop {
            if let Ok(line) = shared.lines.get(&key) {
                let mut inner = line.lock();
                if inner.phase != Phase::Active {
                    // Torn down under our feet; its entry is already gone.
                    continue;
                }
                let joined = line.join(&mut inner, config);
                drop(inner);
                break joined.map(|()| line);
            }

            let chip = match held_chip.take() {
                Some(chip) => chip,
                None => Chip::acquire(
                    &shared.chips,
                    &*shared.driver,
                    &key.chip,
                    &shared.options.consumer,
                )?,
            };
            match shared.create_line(&key, config, chip)? {
                Created::Line(line) => break Ok(line),
                Created::Raced(chip) => held_chip = Some(chip),
            }
        };

        if let Some(chip) = held_chip.take() {
            shared.release_chip(&chip);
        }
        result.map(|line| LineRef::new(line, self.shared.clone()))
    }

    /// Look up a requested line without taking ownership.
    ///
    /// The returned handle is a view: it never counts against `max_owners`,
    /// and closing or dropping it leaves the line alone. It goes inert when
    /// the owners release the line.
    pub fn get_line(&self, chip: &str, offset: u32) -> LineResult<LineRef> {
        let line = self.shared.lookup(chip, offset)?;
        if line.lock().phase != Phase::Active {
            return Err(LineError::LineNotFound {
                chip: chip.to_string(),
                offset,
            });
        }
        Ok(LineRef::view(line, self.shared.clone()))
    }

    /// Drive a requested output line.
    pub fn set_state(&self, chip: &str, offset: u32, state: State) -> LineResult<()> {
        self.shared.lookup(chip, offset)?.set_state(state)
    }

    /// Current logical state of a requested line.
    pub fn state(&self, chip: &str, offset: u32) -> LineResult<State> {
        Ok(self.shared.lookup(chip, offset)?.state())
    }

    /// Subscribe to a requested line without owning it.
    ///
    /// The watcher ends when the line is torn down.
    pub fn watch(&self, chip: &str, offset: u32) -> LineResult<Watcher> {
        let line = self.shared.lookup(chip, offset)?;
        Watcher::subscribe(&line, None)
    }

    /// Request a line and subscribe to it in one step.
    ///
    /// The watcher holds one ownership; closing or dropping it releases the
    /// line.
    pub fn request_watcher(&self, chip: &str, offset: u32, config: LineConfig) -> LineResult<Watcher> {
        let owner = self.request_line(chip, offset, config)?;
        owner.into_watcher()
    }

    /// Every event of every line of this controller.
    ///
    /// After [`shutdown`](Self::shutdown) the returned watcher is already
    /// closed.
    pub fn watch_all(&self) -> Watcher {
        Watcher::from_hub(&self.shared.events)
    }

    /// Request every `[[lines]]` entry of `config`.
    ///
    /// All or nothing: if one request fails, the lines acquired so far are
    /// released again before the error is returned.
    pub fn request_declared(&self, config: &LinegateConfig) -> LineResult<Vec<LineRef>> {
        let mut acquired = Vec::with_capacity(config.lines.len());
        for declaration in &config.lines {
            let requested = declaration
                .line_config()
                .and_then(|line_config| {
                    self.request_line(&declaration.chip, declaration.offset, line_config)
                });
            match requested {
                Ok(line) => acquired.push(line),
                Err(err) => {
                    for line in acquired {
                        if let Err(close_err) = line.close() {
                            error!(error = %close_err, "Rollback release failed");
                        }
                    }
                    return Err(err);
                }
            }
        }
        info!(count = acquired.len(), "Declared lines requested");
        Ok(acquired)
    }

    /// Tear down every line and close every chip, bypassing owner counts.
    ///
    /// Idempotent and safe against lines being closed concurrently. Every
    /// failure is collected; one failing line never keeps the others open.
    /// Outstanding [`LineRef`]s become inert.
    pub fn shutdown(&self) -> LineResult<()> {
        let shared = &self.shared;
        let first = !shared.shut_down.swap(true, Ordering::SeqCst);
        let mut errors = Vec::new();

        shared.lines.for_each(|_, line| {
            if let Err(err) = line.shutdown(shared) {
                errors.push(err);
            }
        });
        shared.chips.for_each(|_, chip| {
            if let Err(err) = chip.force_close(&shared.chips) {
                errors.push(err);
            }
        });
        shared.events.cleanup();

        if first {
            if errors.is_empty() {
                info!("Line controller shut down");
            } else {
                error!(failures = errors.len(), "Line controller shut down with errors");
            }
        }
        LineError::aggregate(errors)
    }

    /// True after [`shutdown`](Self::shutdown).
    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::SeqCst)
    }
}
