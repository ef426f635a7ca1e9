//! Common infrastructure for the mock driver.
//!
//! - **errors**: Error injection framework
//! - **rng**: Seeded random number generator

pub mod errors;
pub mod rng;

pub use errors::{ErrorConfig, ErrorScenario, Operation};
pub use rng::MockRng;
