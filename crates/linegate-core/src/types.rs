//! Value types shared by the controller and drivers.
//!
//! Every enum here has a lowercase string form used by configuration files,
//! `Display`, `FromStr` and serde alike. Parse failures are reported as
//! [`LineError::InvalidConfiguration`].

use crate::error::LineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// State / Level / Edge
// =============================================================================

/// Logical state of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Low / released.
    #[default]
    Inactive,
    /// High / asserted.
    Active,
}

impl State {
    /// Physical level that represents this state.
    pub fn level(self) -> Level {
        match self {
            State::Active => Level::High,
            State::Inactive => Level::Low,
        }
    }

    /// The opposite state.
    pub fn toggled(self) -> Self {
        match self {
            State::Active => State::Inactive,
            State::Inactive => State::Active,
        }
    }
}

impl From<Level> for State {
    fn from(level: Level) -> Self {
        match level {
            Level::High => State::Active,
            Level::Low => State::Inactive,
        }
    }
}

impl From<Edge> for State {
    fn from(edge: Edge) -> Self {
        match edge {
            Edge::Rising => State::Active,
            Edge::Falling => State::Inactive,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Active => "active",
            State::Inactive => "inactive",
        })
    }
}

impl FromStr for State {
    type Err = LineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(State::Active),
            "inactive" => Ok(State::Inactive),
            other => Err(LineError::InvalidConfiguration(format!(
                "state can't be '{}', only 'active' or 'inactive'",
                other
            ))),
        }
    }
}

/// Physical level on the wire, as seen by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Logic 0.
    Low,
    /// Logic 1.
    High,
}

/// Direction of a hardware-detected transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    /// Low to high.
    Rising,
    /// High to low.
    Falling,
}

// =============================================================================
// Mode / Pull
// =============================================================================

/// Direction a line is opened in. Fixed for the lifetime of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Read the line; state follows hardware edges.
    Input,
    /// Drive the line; state follows `set_state`.
    Output,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Input => "input",
            Mode::Output => "output",
        })
    }
}

impl FromStr for Mode {
    type Err = LineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(Mode::Input),
            "output" => Ok(Mode::Output),
            other => Err(LineError::InvalidConfiguration(format!(
                "mode can't be '{}', only 'input' or 'output'",
                other
            ))),
        }
    }
}

/// Bias applied to an input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    /// No bias.
    #[default]
    Disabled,
    /// Pull-down resistor.
    Down,
    /// Pull-up resistor.
    Up,
}

impl fmt::Display for Pull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Pull::Disabled => "disabled",
            Pull::Down => "down",
            Pull::Up => "up",
        })
    }
}

impl FromStr for Pull {
    type Err = LineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(Pull::Disabled),
            "down" => Ok(Pull::Down),
            "up" => Ok(Pull::Up),
            other => Err(LineError::InvalidConfiguration(format!(
                "pull can't be '{}', only 'disabled', 'down' or 'up'",
                other
            ))),
        }
    }
}

// =============================================================================
// LineConfig
// =============================================================================

/// Requested configuration of a line.
///
/// Pull only exists for inputs and the initial state only for outputs, so a
/// malformed combination cannot be expressed. The mode is authoritative on
/// re-request; pull and initial state are honoured only when the line is
/// first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum LineConfig {
    /// Input with the given bias. Edge events on both directions are delivered.
    Input {
        /// Bias resistor.
        #[serde(default)]
        pull: Pull,
    },
    /// Output driven to `initial` when the line is opened.
    Output {
        /// Level written when the hardware line is claimed.
        #[serde(default)]
        initial: State,
    },
}

impl LineConfig {
    /// Input with the given pull.
    pub fn input(pull: Pull) -> Self {
        LineConfig::Input { pull }
    }

    /// Output starting at `initial`.
    pub fn output(initial: State) -> Self {
        LineConfig::Output { initial }
    }

    /// Mode of this configuration.
    pub fn mode(&self) -> Mode {
        match self {
            LineConfig::Input { .. } => Mode::Input,
            LineConfig::Output { .. } => Mode::Output,
        }
    }

    /// Pull for inputs, `None` for outputs.
    pub fn pull(&self) -> Option<Pull> {
        match self {
            LineConfig::Input { pull } => Some(*pull),
            LineConfig::Output { .. } => None,
        }
    }

    /// Logical state the line starts in.
    pub fn initial_state(&self) -> State {
        match self {
            LineConfig::Input { .. } => State::Inactive,
            LineConfig::Output { initial } => *initial,
        }
    }

    /// Build a configuration from its string parts.
    ///
    /// `pull` is only accepted for inputs and `initial` only for outputs.
    pub fn parse(mode: &str, pull: Option<&str>, initial: Option<&str>) -> Result<Self, LineError> {
        match mode.parse::<Mode>()? {
            Mode::Input => {
                if initial.is_some() {
                    return Err(LineError::InvalidConfiguration(
                        "an input line has no initial state".into(),
                    ));
                }
                let pull = pull.map(str::parse::<Pull>).transpose()?.unwrap_or_default();
                Ok(LineConfig::Input { pull })
            }
            Mode::Output => {
                if pull.is_some() {
                    return Err(LineError::InvalidConfiguration(
                        "pull only applies to input lines".into(),
                    ));
                }
                let initial = initial.map(str::parse::<State>).transpose()?.unwrap_or_default();
                Ok(LineConfig::Output { initial })
            }
        }
    }
}

impl Default for LineConfig {
    fn default() -> Self {
        LineConfig::Input {
            pull: Pull::Disabled,
        }
    }
}

// =============================================================================
// LineKey / LineEvent / LineInfo
// =============================================================================

/// Registry key of a line: chip name plus offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineKey {
    /// Chip name.
    pub chip: String,
    /// Line offset on the chip.
    pub offset: u32,
}

impl LineKey {
    /// Create a key.
    pub fn new(chip: impl Into<String>, offset: u32) -> Self {
        Self {
            chip: chip.into(),
            offset,
        }
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chip, self.offset)
    }
}

/// A state transition of one line, as delivered to watchers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEvent {
    /// Chip name.
    pub chip: String,
    /// Line offset.
    pub offset: u32,
    /// State after the transition.
    pub state: State,
    /// True when the transition came from a hardware edge on an input.
    pub is_hardware_edge: bool,
    /// When the transition was recorded.
    pub timestamp: DateTime<Utc>,
}

impl LineEvent {
    /// Event stamped with the current time.
    pub fn now(key: &LineKey, state: State, is_hardware_edge: bool) -> Self {
        Self {
            chip: key.chip.clone(),
            offset: key.offset,
            state,
            is_hardware_edge,
            timestamp: Utc::now(),
        }
    }

    /// Registry key of the line that emitted this event.
    pub fn key(&self) -> LineKey {
        LineKey::new(self.chip.clone(), self.offset)
    }
}

/// Point-in-time description of a live line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInfo {
    /// Chip name.
    pub chip: String,
    /// Line offset.
    pub offset: u32,
    /// Direction.
    pub mode: Mode,
    /// Bias, for inputs.
    pub pull: Option<Pull>,
    /// Current logical state.
    pub state: State,
    /// Number of logical owners.
    pub owners: u32,
    /// Consumer tag the chip was opened with.
    pub consumer: String,
}
