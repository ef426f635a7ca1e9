//! Mock line driver for linegate
//!
//! This crate provides simulated GPIO chips for testing without hardware.
//! Lines are claimed exclusively, levels are tracked, and every driver call
//! is counted so tests can assert exactly when hardware handles were opened
//! and closed.
//!
//! # Error injection
//!
//! Failures are configured through [`ErrorConfig`], either up front or while
//! a test runs:
//!
//! ```rust
//! use linegate_core::types::LineKey;
//! use linegate_driver_mock::{ErrorScenario, MockDriver, Operation};
//!
//! let driver = MockDriver::builder().chip("gpiochip0", 32).build();
//! driver.errors().inject(ErrorScenario::OnLine {
//!     operation: Operation::CloseLine,
//!     line: LineKey::new("gpiochip0", 4),
//! });
//! ```
//!
//! # Edges
//!
//! [`MockDriver::inject_edge`] runs the registered edge callback on the
//! calling thread; [`MockDriver::spawn_edges`] does it from a separate thread
//! the way a real event reader would.

pub mod common;
mod mock_driver;

pub use common::{ErrorConfig, ErrorScenario, MockRng, Operation};
pub use mock_driver::{MockChip, MockDriver, MockDriverBuilder, MockLine};
