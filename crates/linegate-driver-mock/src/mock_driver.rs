//! Simulated GPIO chips.
//!
//! [`MockDriver`] keeps one shared [`SimState`] behind a `parking_lot` mutex.
//! Chip and line handles hold an `Arc` to it, so a test can keep a clone of
//! the driver and inspect claims, levels and call counters while the
//! controller owns the handles.
//!
//! Edge callbacks are invoked with the simulation lock released: the
//! controller takes its own line lock inside the callback, and its teardown
//! path calls back into [`LineHandle::close`] while holding that lock.

use crate::common::{ErrorConfig, MockRng, Operation};
use linegate_core::driver::{ChipHandle, EdgeCallback, EdgeEvent, LineDriver, LineHandle};
use linegate_core::error::{DriverError, DriverErrorKind, DriverResult};
use linegate_core::types::{Edge, Level, LineConfig, LineKey, Mode, State};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, trace};

const DRIVER_TYPE: &str = "mock";

struct Claim {
    mode: Mode,
    level: Level,
    consumer: String,
    on_edge: Option<EdgeCallback>,
}

#[derive(Default)]
struct Counters {
    chip_opens: HashMap<String, u32>,
    chip_closes: HashMap<String, u32>,
    line_opens: HashMap<LineKey, u32>,
    line_closes: HashMap<LineKey, u32>,
    writes: HashMap<LineKey, Vec<Level>>,
}

#[derive(Default)]
struct SimState {
    claims: HashMap<LineKey, Claim>,
    open_chips: HashMap<String, u32>,
    counters: Counters,
}

struct Shared {
    chips: BTreeMap<String, u32>,
    errors: ErrorConfig,
    state: Mutex<SimState>,
}

impl Shared {
    fn check(&self, operation: Operation, line: Option<&LineKey>) -> DriverResult<()> {
        self.errors.check_operation(DRIVER_TYPE, operation, line)
    }
}

/// In-memory line driver with exclusive claims and error injection.
#[derive(Clone)]
pub struct MockDriver {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDriver")
            .field("chips", &self.shared.chips)
            .finish_non_exhaustive()
    }
}

/// Builder for [`MockDriver`].
#[derive(Debug, Default)]
pub struct MockDriverBuilder {
    chips: BTreeMap<String, u32>,
    errors: ErrorConfig,
}

impl MockDriverBuilder {
    /// Add a chip with `line_count` lines.
    pub fn chip(mut self, name: impl Into<String>, line_count: u32) -> Self {
        self.chips.insert(name.into(), line_count);
        self
    }

    /// Use the given error injection configuration.
    pub fn errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Build the driver.
    pub fn build(self) -> MockDriver {
        MockDriver {
            shared: Arc::new(Shared {
                chips: self.chips,
                errors: self.errors,
                state: Mutex::new(SimState::default()),
            }),
        }
    }
}

impl Default for MockDriver {
    /// A Raspberry Pi shaped board: `gpiochip0` with 54 lines and `gpiochip1` with 8.
    fn default() -> Self {
        Self::builder()
            .chip("gpiochip0", 54)
            .chip("gpiochip1", 8)
            .build()
    }
}

impl MockDriver {
    /// Start building a driver with no chips.
    pub fn builder() -> MockDriverBuilder {
        MockDriverBuilder::default()
    }

    /// The error injection configuration shared by every handle.
    pub fn errors(&self) -> &ErrorConfig {
        &self.shared.errors
    }

    /// Simulate a hardware edge on an input line.
    ///
    /// The level is updated and the registered callback runs on the calling
    /// thread. Returns false when the line is not claimed as an input.
    pub fn inject_edge(&self, chip: &str, offset: u32, edge: Edge) -> bool {
        let key = LineKey::new(chip, offset);
        let callback = {
            let mut state = self.shared.state.lock();
            let Some(claim) = state.claims.get_mut(&key) else {
                return false;
            };
            if claim.mode != Mode::Input {
                return false;
            }
            claim.level = State::from(edge).level();
            claim.on_edge.clone()
        };
        trace!(line = %key, ?edge, "Injecting edge");
        if let Some(callback) = callback {
            callback(EdgeEvent::now(offset, edge));
        }
        true
    }

    /// Deliver `edges` one by one from a dedicated thread, like a real
    /// driver's event reader would.
    pub fn spawn_edges(&self, chip: &str, offset: u32, edges: Vec<Edge>) -> JoinHandle<usize> {
        let driver = self.clone();
        let chip = chip.to_string();
        std::thread::spawn(move || {
            edges
                .into_iter()
                .filter(|edge| driver.inject_edge(&chip, offset, *edge))
                .count()
        })
    }

    /// Deliver `count` alternating edges from a dedicated thread, with a
    /// seeded coin deciding the first direction.
    pub fn spawn_edge_train(
        &self,
        chip: &str,
        offset: u32,
        count: usize,
        seed: u64,
    ) -> JoinHandle<usize> {
        let rng = MockRng::new(Some(seed));
        let mut edge = if rng.coin() { Edge::Rising } else { Edge::Falling };
        let edges = (0..count)
            .map(|_| {
                let current = edge;
                edge = match edge {
                    Edge::Rising => Edge::Falling,
                    Edge::Falling => Edge::Rising,
                };
                current
            })
            .collect();
        self.spawn_edges(chip, offset, edges)
    }

    /// True while the line is claimed.
    pub fn is_claimed(&self, chip: &str, offset: u32) -> bool {
        self.shared
            .state
            .lock()
            .claims
            .contains_key(&LineKey::new(chip, offset))
    }

    /// Consumer tag of the current claim.
    pub fn consumer(&self, chip: &str, offset: u32) -> Option<String> {
        self.shared
            .state
            .lock()
            .claims
            .get(&LineKey::new(chip, offset))
            .map(|claim| claim.consumer.clone())
    }

    /// Physical level of a claimed line.
    pub fn level(&self, chip: &str, offset: u32) -> Option<Level> {
        self.shared
            .state
            .lock()
            .claims
            .get(&LineKey::new(chip, offset))
            .map(|claim| claim.level)
    }

    /// How many times the line was claimed.
    pub fn line_opens(&self, chip: &str, offset: u32) -> u32 {
        let state = self.shared.state.lock();
        counter(&state.counters.line_opens, &LineKey::new(chip, offset))
    }

    /// How many times the line handle was closed, failed attempts included.
    pub fn line_closes(&self, chip: &str, offset: u32) -> u32 {
        let state = self.shared.state.lock();
        counter(&state.counters.line_closes, &LineKey::new(chip, offset))
    }

    /// Every level written to the line, in order.
    pub fn writes(&self, chip: &str, offset: u32) -> Vec<Level> {
        self.shared
            .state
            .lock()
            .counters
            .writes
            .get(&LineKey::new(chip, offset))
            .cloned()
            .unwrap_or_default()
    }

    /// How many times the chip was opened.
    pub fn chip_opens(&self, chip: &str) -> u32 {
        let state = self.shared.state.lock();
        state.counters.chip_opens.get(chip).copied().unwrap_or(0)
    }

    /// How many times the chip was closed.
    pub fn chip_closes(&self, chip: &str) -> u32 {
        let state = self.shared.state.lock();
        state.counters.chip_closes.get(chip).copied().unwrap_or(0)
    }

    /// Number of currently open handles on the chip.
    pub fn open_handles(&self, chip: &str) -> u32 {
        let state = self.shared.state.lock();
        state.open_chips.get(chip).copied().unwrap_or(0)
    }

    /// Number of claimed lines across all chips.
    pub fn claimed_lines(&self) -> usize {
        self.shared.state.lock().claims.len()
    }
}

fn counter(map: &HashMap<LineKey, u32>, key: &LineKey) -> u32 {
    map.get(key).copied().unwrap_or(0)
}

impl LineDriver for MockDriver {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn chip_names(&self) -> Vec<String> {
        self.shared.chips.keys().cloned().collect()
    }

    fn open_chip(&self, name: &str, consumer: &str) -> DriverResult<Box<dyn ChipHandle>> {
        let Some(line_count) = self.shared.chips.get(name).copied() else {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidParameter,
                format!("no chip named '{}'", name),
            ));
        };
        self.shared.check(Operation::OpenChip, None)?;
        {
            let mut state = self.shared.state.lock();
            *state.open_chips.entry(name.to_string()).or_insert(0) += 1;
            *state
                .counters
                .chip_opens
                .entry(name.to_string())
                .or_insert(0) += 1;
        }
        debug!(chip = name, consumer, "Mock chip opened");
        Ok(Box::new(MockChip {
            shared: self.shared.clone(),
            name: name.to_string(),
            consumer: consumer.to_string(),
            line_count,
        }))
    }
}

/// Open handle on a simulated chip.
pub struct MockChip {
    shared: Arc<Shared>,
    name: String,
    consumer: String,
    line_count: u32,
}

impl ChipHandle for MockChip {
    fn name(&self) -> &str {
        &self.name
    }

    fn line_count(&self) -> u32 {
        self.line_count
    }

    fn request_line(
        &mut self,
        offset: u32,
        config: LineConfig,
        on_edge: Option<EdgeCallback>,
    ) -> DriverResult<Box<dyn LineHandle>> {
        let key = LineKey::new(self.name.clone(), offset);
        if offset >= self.line_count {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidParameter,
                format!("offset {} out of range on '{}'", offset, self.name),
            ));
        }
        self.shared.check(Operation::RequestLine, Some(&key))?;

        let mut state = self.shared.state.lock();
        if let Some(existing) = state.claims.get(&key) {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Busy,
                format!("line {} is already claimed by '{}'", key, existing.consumer),
            ));
        }
        let mode = config.mode();
        let on_edge = match mode {
            Mode::Input => on_edge,
            Mode::Output => None,
        };
        state.claims.insert(
            key.clone(),
            Claim {
                mode,
                level: config.initial_state().level(),
                consumer: self.consumer.clone(),
                on_edge,
            },
        );
        *state.counters.line_opens.entry(key.clone()).or_insert(0) += 1;
        drop(state);

        debug!(line = %key, %mode, consumer = %self.consumer, "Mock line claimed");
        Ok(Box::new(MockLine {
            shared: self.shared.clone(),
            key,
            mode,
        }))
    }

    fn close(self: Box<Self>) -> DriverResult<()> {
        self.shared.check(Operation::CloseChip, None)?;
        let mut state = self.shared.state.lock();
        if let Some(open) = state.open_chips.get_mut(&self.name) {
            *open = open.saturating_sub(1);
        }
        *state
            .counters
            .chip_closes
            .entry(self.name.clone())
            .or_insert(0) += 1;
        debug!(chip = %self.name, "Mock chip closed");
        Ok(())
    }
}

/// Claimed simulated line.
pub struct MockLine {
    shared: Arc<Shared>,
    key: LineKey,
    mode: Mode,
}

impl LineHandle for MockLine {
    fn offset(&self) -> u32 {
        self.key.offset
    }

    fn read(&self) -> DriverResult<Level> {
        self.shared.check(Operation::Read, Some(&self.key))?;
        let state = self.shared.state.lock();
        state
            .claims
            .get(&self.key)
            .map(|claim| claim.level)
            .ok_or_else(|| {
                DriverError::new(
                    DRIVER_TYPE,
                    DriverErrorKind::InvalidParameter,
                    format!("line {} is not claimed", self.key),
                )
            })
    }

    fn write(&mut self, level: Level) -> DriverResult<()> {
        if self.mode != Mode::Output {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidParameter,
                format!("line {} is an input", self.key),
            ));
        }
        self.shared.check(Operation::Write, Some(&self.key))?;
        let mut state = self.shared.state.lock();
        if let Some(claim) = state.claims.get_mut(&self.key) {
            claim.level = level;
        }
        state
            .counters
            .writes
            .entry(self.key.clone())
            .or_default()
            .push(level);
        Ok(())
    }

    fn close(self: Box<Self>) -> DriverResult<()> {
        let result = self.shared.check(Operation::CloseLine, Some(&self.key));
        let mut state = self.shared.state.lock();
        state.claims.remove(&self.key);
        *state
            .counters
            .line_closes
            .entry(self.key.clone())
            .or_insert(0) += 1;
        debug!(line = %self.key, failed = result.is_err(), "Mock line released");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;
    use linegate_core::types::Pull;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn driver() -> MockDriver {
        MockDriver::builder().chip("gpiochip0", 8).build()
    }

    #[test]
    fn test_claims_are_exclusive() {
        let driver = driver();
        let mut chip = driver.open_chip("gpiochip0", "test").unwrap();
        let line = chip
            .request_line(3, LineConfig::output(State::Active), None)
            .unwrap();
        assert_eq!(driver.level("gpiochip0", 3), Some(Level::High));
        let err = chip
            .request_line(3, LineConfig::input(Pull::Up), None)
            .err()
            .unwrap();
        assert_eq!(err.kind, DriverErrorKind::Busy);
        line.close().unwrap();
        assert!(!driver.is_claimed("gpiochip0", 3));
        assert_eq!(driver.line_opens("gpiochip0", 3), 1);
        assert_eq!(driver.line_closes("gpiochip0", 3), 1);
    }

    #[test]
    fn test_unknown_chip() {
        assert!(driver().open_chip("gpiochip9", "test").is_err());
    }

    #[test]
    fn test_write_records_levels() {
        let driver = driver();
        let mut chip = driver.open_chip("gpiochip0", "test").unwrap();
        let mut line = chip
            .request_line(1, LineConfig::output(State::Inactive), None)
            .unwrap();
        line.write(Level::High).unwrap();
        line.write(Level::Low).unwrap();
        assert_eq!(driver.writes("gpiochip0", 1), vec![Level::High, Level::Low]);
        assert_eq!(line.read().unwrap(), Level::Low);
    }

    #[test]
    fn test_injected_write_failure() {
        let driver = driver();
        driver.errors().inject(ErrorScenario::OnLine {
            operation: Operation::Write,
            line: LineKey::new("gpiochip0", 2),
        });
        let mut chip = driver.open_chip("gpiochip0", "test").unwrap();
        let mut line = chip
            .request_line(2, LineConfig::output(State::Inactive), None)
            .unwrap();
        assert!(line.write(Level::High).is_err());
        assert_eq!(driver.level("gpiochip0", 2), Some(Level::Low));
        assert!(driver.writes("gpiochip0", 2).is_empty());
    }

    #[test]
    fn test_edges_reach_callback() {
        let driver = driver();
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = seen.clone();
        let callback: EdgeCallback = Arc::new(move |event: EdgeEvent| {
            assert_eq!(event.offset, 5);
            sink.fetch_add(1, Ordering::SeqCst);
        });
        let mut chip = driver.open_chip("gpiochip0", "test").unwrap();
        let _line = chip
            .request_line(5, LineConfig::input(Pull::Disabled), Some(callback))
            .unwrap();
        assert!(driver.inject_edge("gpiochip0", 5, Edge::Rising));
        assert_eq!(driver.level("gpiochip0", 5), Some(Level::High));
        let delivered = driver.spawn_edge_train("gpiochip0", 5, 10, 1).join().unwrap();
        assert_eq!(delivered, 10);
        assert_eq!(seen.load(Ordering::SeqCst), 11);
        assert!(!driver.inject_edge("gpiochip0", 6, Edge::Rising));
    }

    #[test]
    fn test_chip_handle_counting() {
        let driver = driver();
        let a = driver.open_chip("gpiochip0", "test").unwrap();
        let b = driver.open_chip("gpiochip0", "test").unwrap();
        assert_eq!(driver.open_handles("gpiochip0"), 2);
        a.close().unwrap();
        b.close().unwrap();
        assert_eq!(driver.open_handles("gpiochip0"), 0);
        assert_eq!(driver.chip_opens("gpiochip0"), 2);
        assert_eq!(driver.chip_closes("gpiochip0"), 2);
    }
}
