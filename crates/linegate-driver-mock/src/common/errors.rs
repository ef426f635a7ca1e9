//! Error injection framework for the mock line driver.
//!
//! Every driver call passes through [`ErrorConfig::check_operation`] before it
//! touches simulated state. Scenarios can be given up front or injected while
//! a test runs, e.g. to make one particular line fail to close during shutdown.

use super::rng::MockRng;
use linegate_core::error::{DriverError, DriverErrorKind};
use linegate_core::types::LineKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Driver operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `LineDriver::open_chip`
    OpenChip,
    /// `ChipHandle::close`
    CloseChip,
    /// `ChipHandle::request_line`
    RequestLine,
    /// `LineHandle::read`
    Read,
    /// `LineHandle::write`
    Write,
    /// `LineHandle::close`
    CloseLine,
}

impl Operation {
    fn kind(self) -> DriverErrorKind {
        match self {
            Operation::OpenChip | Operation::RequestLine => DriverErrorKind::Initialization,
            Operation::CloseChip | Operation::CloseLine => DriverErrorKind::Shutdown,
            Operation::Read | Operation::Write => DriverErrorKind::Hardware,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::OpenChip => "open_chip",
            Operation::CloseChip => "close_chip",
            Operation::RequestLine => "request_line",
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::CloseLine => "close_line",
        })
    }
}

/// A failure pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorScenario {
    /// Every call of `operation` fails.
    Always {
        /// Failing operation.
        operation: Operation,
    },
    /// `operation` fails on one specific line only.
    OnLine {
        /// Failing operation.
        operation: Operation,
        /// Chip and offset of the failing line.
        line: LineKey,
    },
    /// Fail after N successful calls of `operation`.
    FailAfterN {
        /// Counted operation.
        operation: Operation,
        /// Successful calls before the first failure.
        count: u32,
    },
    /// `operation` times out.
    Timeout {
        /// Failing operation.
        operation: Operation,
    },
    /// First matching call latches a hardware fault; every later call fails too.
    HardwareFault {
        /// Reported fault code.
        code: u32,
    },
}

#[derive(Default, Debug)]
struct ErrorState {
    /// Scenarios injected after construction
    injected: Vec<ErrorScenario>,
    /// Operation counters for FailAfterN scenarios
    operation_counts: HashMap<Operation, u32>,
    /// Hardware fault code (0 = no fault)
    hardware_fault_code: u32,
}

/// Error injection configuration for the mock driver
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0)
    failure_rates: Arc<HashMap<Operation, f64>>,
    /// Scenarios fixed at construction
    scenarios: Arc<Vec<ErrorScenario>>,
    /// RNG for failure decisions
    rng: Arc<MockRng>,
    /// Injected scenarios and counters
    state: Arc<Mutex<ErrorState>>,
}

impl ErrorConfig {
    /// Create error config with no errors (default)
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Create error config with a single scenario
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Create error config with multiple scenarios
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Create error config with per-operation random failure rates and a seed
    pub fn with_rates_seeded(rates: HashMap<Operation, f64>, seed: Option<u64>) -> Self {
        Self::build(rates, Vec::new(), seed)
    }

    fn build(
        rates: HashMap<Operation, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Add a scenario at runtime. Shared by every clone of this config.
    pub fn inject(&self, scenario: ErrorScenario) {
        self.state.lock().injected.push(scenario);
    }

    /// Check if an operation should fail and return appropriate error
    pub fn check_operation(
        &self,
        driver_type: &str,
        operation: Operation,
        line: Option<&LineKey>,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();

        if state.hardware_fault_code != 0 {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Hardware fault: {}", state.hardware_fault_code),
            ));
        }

        let injected = state.injected.clone();
        for scenario in self.scenarios.iter().chain(injected.iter()) {
            match scenario {
                ErrorScenario::Always { operation: op } if *op == operation => {
                    return Err(DriverError::new(
                        driver_type,
                        operation.kind(),
                        format!("Injected '{}' failure", operation),
                    ));
                }
                ErrorScenario::OnLine {
                    operation: op,
                    line: target,
                } if *op == operation && line == Some(target) => {
                    return Err(DriverError::new(
                        driver_type,
                        operation.kind(),
                        format!("Injected '{}' failure on line {}", operation, target),
                    ));
                }
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation => {
                    let current = state.operation_counts.entry(operation).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        return Err(DriverError::new(
                            driver_type,
                            operation.kind(),
                            format!("Injected failure after {} operations", count),
                        ));
                    }
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Timeout,
                        format!("Operation '{}' timed out", operation),
                    ));
                }
                ErrorScenario::HardwareFault { code } => {
                    state.hardware_fault_code = *code;
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Hardware,
                        format!("Hardware fault: {}", code),
                    ));
                }
                _ => {}
            }
        }

        let rate = self.failure_rates.get(&operation).copied().unwrap_or(0.0);
        if self.rng.should_fail(rate) {
            return Err(DriverError::new(
                driver_type,
                operation.kind(),
                format!("Random failure on operation '{}'", operation),
            ));
        }

        Ok(())
    }

    /// Clear injected scenarios, counters and latched faults
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}
