//! Chip entity: lazily opened driver chip handle shared by its lines.
//!
//! A [`Chip`] counts the lines opened under it with an unhooked
//! [`RefGate`]. The first line opens the driver handle, the last one closes
//! it and removes the chip from the [`ChipRegistry`]. Lines keep a weak back
//! reference; the registry owns the `Arc<Chip>`.
//!
//! Lock order: a `Line` lock may be held while taking a `Chip` lock, never the
//! reverse. The registry lock is a leaf.

use crate::registry::ChipRegistry;
use linegate_core::driver::{ChipHandle, EdgeCallback, LineDriver, LineHandle};
use linegate_core::error::{DriverError, DriverErrorKind, LineError, LineResult};
use linegate_core::ref_gate::{RefGate, Transition};
use linegate_core::types::LineConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};

struct ChipInner {
    gate: RefGate,
    handle: Option<Box<dyn ChipHandle>>,
    line_count: u32,
    closed: bool,
}

/// An open driver chip and the owner count of its lines.
pub struct Chip {
    name: String,
    consumer: String,
    inner: Mutex<ChipInner>,
}

impl std::fmt::Debug for Chip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Chip")
            .field("name", &self.name)
            .field("owners", &inner.gate.count())
            .field("open", &inner.handle.is_some())
            .finish()
    }
}

impl Chip {
    /// Take one ownership of chip `name`, opening it if nobody holds it.
    ///
    /// Concurrent callers for the same name serialize on the chip lock: the
    /// instance registered first opens the driver handle, everyone else joins
    /// it. A chip found closed has already left the registry and is skipped.
    pub(crate) fn acquire(
        chips: &ChipRegistry,
        driver: &dyn LineDriver,
        name: &str,
        consumer: &str,
    ) -> LineResult<Arc<Chip>> {
        loop {
            if let Ok(chip) = chips.get(&name.to_string()) {
                let mut inner = chip.inner.lock();
                if inner.closed {
                    // Closing removes the entry under this lock, so the next
                    // lookup sees a successor or nothing.
                    continue;
                }
                inner.gate.add();
                drop(inner);
                return Ok(chip);
            }

            let chip = Arc::new(Chip {
                name: name.to_string(),
                consumer: consumer.to_string(),
                inner: Mutex::new(ChipInner {
                    gate: RefGate::unhooked(),
                    handle: None,
                    line_count: 0,
                    closed: false,
                }),
            });
            let mut inner = chip.inner.lock();
            if chips.add(name.to_string(), chip.clone()).is_err() {
                continue;
            }

            match driver.open_chip(name, consumer) {
                Ok(handle) => {
                    inner.line_count = handle.line_count();
                    inner.handle = Some(handle);
                    inner.gate.add();
                    info!(chip = name, consumer, lines = inner.line_count, "Chip opened");
                    drop(inner);
                    return Ok(chip);
                }
                Err(err) => {
                    inner.closed = true;
                    chips.remove_if_same(&name.to_string(), &chip);
                    return Err(err.into());
                }
            }
        }
    }

    /// Drop one ownership. The last owner closes the driver handle.
    pub(crate) fn release(self: &Arc<Self>, chips: &ChipRegistry) -> LineResult<()> {
        let mut inner = self.inner.lock();
        if inner.gate.delete() != Some(Transition::Deactivated) {
            return Ok(());
        }
        self.close_locked(&mut inner, chips)
    }

    /// Close the handle regardless of remaining owners. Idempotent.
    pub(crate) fn force_close(self: &Arc<Self>, chips: &ChipRegistry) -> LineResult<()> {
        let mut inner = self.inner.lock();
        inner.gate.shutdown();
        self.close_locked(&mut inner, chips)
    }

    fn close_locked(self: &Arc<Self>, inner: &mut ChipInner, chips: &ChipRegistry) -> LineResult<()> {
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        let result = match inner.handle.take() {
            Some(handle) => handle.close(),
            None => Ok(()),
        };
        chips.remove_if_same(&self.name, self);
        match result {
            Ok(()) => {
                info!(chip = %self.name, "Chip closed");
                Ok(())
            }
            Err(err) => {
                error!(chip = %self.name, error = %err, "Chip close failed");
                Err(err.into())
            }
        }
    }

    /// Claim one line on the open chip handle.
    pub(crate) fn request_line(
        &self,
        offset: u32,
        config: LineConfig,
        on_edge: Option<EdgeCallback>,
    ) -> LineResult<Box<dyn LineHandle>> {
        let mut inner = self.inner.lock();
        let handle = inner.handle.as_mut().ok_or_else(|| {
            LineError::Driver(DriverError::new(
                "linegate",
                DriverErrorKind::Shutdown,
                format!("chip '{}' is not open", self.name),
            ))
        })?;
        Ok(handle.request_line(offset, config, on_edge)?)
    }

    /// Chip name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consumer tag the chip was opened with.
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Number of lines the driver reports for this chip.
    pub fn line_count(&self) -> u32 {
        self.inner.lock().line_count
    }

    /// Number of lines currently open under this chip.
    pub fn owners(&self) -> u32 {
        self.inner.lock().gate.count()
    }

    /// True while the driver handle is open.
    pub fn is_open(&self) -> bool {
        self.inner.lock().handle.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linegate_core::types::State;
    use linegate_driver_mock::{ErrorConfig, ErrorScenario, MockDriver, Operation};

    fn setup() -> (MockDriver, ChipRegistry) {
        let driver = MockDriver::builder().chip("gpiochip0", 8).build();
        (driver, ChipRegistry::new("chips"))
    }

    #[test]
    fn test_first_owner_opens_last_closes() {
        let (driver, chips) = setup();
        let a = Chip::acquire(&chips, &driver, "gpiochip0", "test").unwrap();
        let b = Chip::acquire(&chips, &driver, "gpiochip0", "test").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.owners(), 2);
        assert_eq!(a.line_count(), 8);
        assert_eq!(driver.chip_opens("gpiochip0"), 1);

        a.release(&chips).unwrap();
        assert!(a.is_open());
        b.release(&chips).unwrap();
        assert!(!a.is_open());
        assert_eq!(driver.chip_closes("gpiochip0"), 1);
        assert!(chips.is_empty());
    }

    #[test]
    fn test_closed_chip_is_replaced_not_rejoined() {
        let (driver, chips) = setup();
        let first = Chip::acquire(&chips, &driver, "gpiochip0", "test").unwrap();
        first.force_close(&chips).unwrap();
        assert!(chips.is_empty());

        let second = Chip::acquire(&chips, &driver, "gpiochip0", "test").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_open());
        assert_eq!(second.owners(), 1);
        assert_eq!(driver.chip_opens("gpiochip0"), 2);
        second.release(&chips).unwrap();
    }

    #[test]
    fn test_concurrent_acquire_and_release_settles() {
        let (driver, chips) = setup();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..200 {
                        let chip = Chip::acquire(&chips, &driver, "gpiochip0", "test").unwrap();
                        chip.release(&chips).unwrap();
                    }
                });
            }
        });
        assert!(chips.is_empty());
        assert_eq!(driver.chip_opens("gpiochip0"), driver.chip_closes("gpiochip0"));
    }

    #[test]
    fn test_open_failure_leaves_nothing() {
        let driver = MockDriver::builder()
            .chip("gpiochip0", 8)
            .errors(ErrorConfig::scenario(ErrorScenario::Always {
                operation: Operation::OpenChip,
            }))
            .build();
        let chips = ChipRegistry::new("chips");
        assert!(matches!(
            Chip::acquire(&chips, &driver, "gpiochip0", "test"),
            Err(LineError::Driver(_))
        ));
        assert!(chips.is_empty());
    }

    #[test]
    fn test_request_line_after_close_fails() {
        let (driver, chips) = setup();
        let chip = Chip::acquire(&chips, &driver, "gpiochip0", "test").unwrap();
        assert!(chip
            .request_line(1, LineConfig::output(State::Inactive), None)
            .is_ok());
        chip.force_close(&chips).unwrap();
        chip.force_close(&chips).unwrap();
        assert!(chip
            .request_line(2, LineConfig::output(State::Inactive), None)
            .is_err());
        assert_eq!(driver.chip_closes("gpiochip0"), 1);
    }
}
