//! Error types for line management.
//!
//! This module defines the two error families used across linegate, both
//! derived with `thiserror`:
//!
//! - [`DriverError`]: a failure reported by the line-driver collaborator
//!   (opening a chip, claiming a line, writing a level, closing a handle).
//!   Drivers classify failures with a [`DriverErrorKind`].
//! - [`LineError`]: the taxonomy returned to application code by the
//!   controller. Validation errors (`ChipNotFound`, `InvalidOffset`,
//!   `DirectionConflict`, `InvalidConfiguration`) are returned synchronously and
//!   never mutate registry state. Driver failures are wrapped in
//!   `LineError::Driver`. Teardown failures are collected, not short-circuited,
//!   into an [`AggregateCloseError`].
//!
//! ## Error Categories
//!
//! 1. **Validation** - `ChipNotFound`, `InvalidOffset`, `InvalidConfiguration`
//!    - Caller error, nothing was created
//!    - Recovery: fix the request
//!
//! 2. **Ownership** - `DirectionConflict`, `OwnerLimitReached`, `LineNotFound`, `LineClosed`
//!    - The line exists (or existed) in a state incompatible with the request
//!    - Recovery: request with a compatible mode, or wait for release
//!
//! 3. **Hardware** - `Driver`, `AggregateClose`
//!    - Reported by the driver collaborator
//!    - Recovery: depends on [`DriverErrorKind`]; `Busy` means another process
//!      holds the line

use crate::types::Mode;
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Classification of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Opening a chip or claiming a line failed.
    Initialization,
    /// The driver rejected the requested line configuration.
    Configuration,
    /// The device stopped responding.
    Communication,
    /// Closing a chip or line handle failed.
    Shutdown,
    /// The device reported a fault.
    Hardware,
    /// The operation did not complete in time.
    Timeout,
    /// The process is not allowed to access the device.
    Permission,
    /// An argument was outside what the device supports.
    InvalidParameter,
    /// The line is already claimed, usually by another process.
    Busy,
    /// Anything else.
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Shutdown => "shutdown",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::Permission => "permission",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Busy => "busy",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// A failure reported by a line driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Name of the driver that failed (e.g. `"mock"`, `"cdev"`).
    pub driver_type: String,
    /// Failure classification.
    pub kind: DriverErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl DriverError {
    /// Create a new driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Result alias for driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

// =============================================================================
// Line Errors
// =============================================================================

/// Convenience alias for results using the line error type.
pub type LineResult<T> = std::result::Result<T, LineError>;

/// Primary error type for line management.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    /// The chip name is not enumerated by the driver.
    #[error("there is no chip named '{chip}'")]
    ChipNotFound {
        /// Requested chip name.
        chip: String,
    },

    /// The offset is outside the chip's line range.
    #[error("offset {offset} is out of range for chip '{chip}' ({line_count} lines)")]
    InvalidOffset {
        /// Chip name.
        chip: String,
        /// Requested offset.
        offset: u32,
        /// Number of lines the chip reports.
        line_count: u32,
    },

    /// The line is already held in a different mode.
    ///
    /// The existing line is left untouched.
    #[error("line {offset} of '{chip}' is already requested as {existing}, not {requested}")]
    DirectionConflict {
        /// Chip name.
        chip: String,
        /// Line offset.
        offset: u32,
        /// Mode of the live line.
        existing: Mode,
        /// Mode that was requested.
        requested: Mode,
    },

    /// A mode, pull or state value could not be parsed or is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// No live line exists at this position.
    #[error("no line is requested at offset {offset} of '{chip}'")]
    LineNotFound {
        /// Chip name.
        chip: String,
        /// Line offset.
        offset: u32,
    },

    /// The line is an input; only its edge events change its state.
    #[error("line {offset} of '{chip}' is an input and cannot be driven")]
    NotAnOutput {
        /// Chip name.
        chip: String,
        /// Line offset.
        offset: u32,
    },

    /// The handle was used after its line was released.
    #[error("line {offset} of '{chip}' is closed")]
    LineClosed {
        /// Chip name.
        chip: String,
        /// Line offset.
        offset: u32,
    },

    /// The line already has the maximum number of owners.
    #[error("line {offset} of '{chip}' already has {limit} owners")]
    OwnerLimitReached {
        /// Chip name.
        chip: String,
        /// Line offset.
        offset: u32,
        /// Configured ceiling.
        limit: u32,
    },

    /// Wrapped failure from the driver collaborator.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Several failures collected while releasing resources.
    #[error(transparent)]
    AggregateClose(#[from] AggregateCloseError),
}

impl LineError {
    /// Collapse a list of teardown failures into a single result.
    ///
    /// Empty means success; any failure is wrapped in an
    /// [`AggregateCloseError`] so callers always match one variant.
    pub fn aggregate(errors: Vec<LineError>) -> LineResult<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LineError::AggregateClose(AggregateCloseError::new(errors)))
        }
    }
}

/// Failures collected during teardown or shutdown.
///
/// One failing line never prevents the others from being released; every
/// failure is kept here in the order it happened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct AggregateCloseError {
    errors: Vec<LineError>,
}

impl AggregateCloseError {
    /// Wrap a list of failures. Nested aggregates are flattened.
    pub fn new(errors: Vec<LineError>) -> Self {
        let mut flat = Vec::with_capacity(errors.len());
        for error in errors {
            match error {
                LineError::AggregateClose(inner) => flat.extend(inner.errors),
                other => flat.push(other),
            }
        }
        Self { errors: flat }
    }

    /// The individual failures.
    pub fn errors(&self) -> &[LineError] {
        &self.errors
    }

    /// Number of failures.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True when no failure was collected.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for AggregateCloseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} close failure(s)", self.errors.len())?;
        for (index, error) in self.errors.iter().enumerate() {
            let sep = if index == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, error)?;
        }
        Ok(())
    }
}
