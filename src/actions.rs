use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The highest position, in percent.
pub const MAX_POSITION: i64 = 100;

/// The voltage a position of 100% maps to.
pub const MAX_POSITION_VOLTS: f64 = 6.0;

/// The highest voltage limit the device accepts.
pub const MAX_LIMIT_VOLTS: f64 = 12.0;

/// A validated command for the device.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Sent as-is.
    Raw(String),

    /// Move the gripper, in percent of its range.
    Position(u8),

    /// Bound the voltage the device applies.
    VoltageLimits {
        /// Lower bound, in volts.
        lower: f64,

        /// Upper bound, in volts.
        upper: f64,
    },
}

impl Command {
    /// A pass-through command.
    /// Must be a single, non-empty line.
    pub fn raw(text: &str) -> Result<Self, Error> {
        let text = text.trim();

        if text.is_empty() {
            return Err(Error::Validation("Command must not be empty".into()));
        }

        if text.contains(['\n', '\r']) {
            return Err(Error::Validation(
                "Command must be a single line".into(),
            ));
        }

        Ok(Self::Raw(text.to_owned()))
    }

    /// A position command. `percent` must be within `0..=100`.
    pub fn position(percent: i64) -> Result<Self, Error> {
        if !(0..=MAX_POSITION).contains(&percent) {
            return Err(Error::Validation(format!(
                "Position must be between 0 and {MAX_POSITION}"
            )));
        }

        Ok(Self::Position(percent as u8))
    }

    /// A voltage limits command. Requires `0 <= lower <= upper <= 12`.
    pub fn voltage_limits(lower: f64, upper: f64) -> Result<Self, Error> {
        if !lower.is_finite() || !upper.is_finite() {
            return Err(Error::Validation(
                "Voltage limits must be numbers".into(),
            ));
        }

        if lower < 0.0 || upper > MAX_LIMIT_VOLTS {
            return Err(Error::Validation(format!(
                "Voltage limits must be between 0 and {MAX_LIMIT_VOLTS}V"
            )));
        }

        if lower > upper {
            return Err(Error::Validation(format!(
                "Lower limit ({lower}V) must not be above upper limit ({upper}V)"
            )));
        }

        Ok(Self::VoltageLimits { lower, upper })
    }

    /// The voltage a position maps to.
    pub fn position_volts(percent: u8) -> f64 {
        f64::from(percent) / MAX_POSITION as f64 * MAX_POSITION_VOLTS
    }

    /// The lines to put on the wire, in order.
    pub fn wire_lines(&self) -> Vec<String> {
        match self {
            Command::Raw(text) => vec![text.clone()],
            Command::Position(percent) => {
                vec![format!("position {}", volts(Self::position_volts(*percent)))]
            }
            Command::VoltageLimits { lower, upper } => vec![
                format!("upperlimit {}", volts(*upper)),
                format!("lowerlimit {}", volts(*lower)),
            ],
        }
    }

    /// What to tell the user once the command is written.
    pub fn success_message(&self) -> String {
        match self {
            Command::Raw(text) => format!("Command {text} sent"),
            Command::Position(percent) => format!("Position set to {percent}%"),
            Command::VoltageLimits { lower, upper } => {
                format!("Voltage limits set to {}V - {}V", volts(*lower), volts(*upper))
            }
        }
    }
}

/// Volts as the firmware expects them: always with a decimal point,
/// and otherwise the shortest text which parses back to the same value.
fn volts(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Raw(text) => write!(f, "raw: {text}"),
            Command::Position(percent) => write!(f, "position: {percent}%"),
            Command::VoltageLimits { lower, upper } => {
                write!(f, "voltage limits: {lower}V..{upper}V")
            }
        }
    }
}

/// Whether a command made it to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Written.
    Success,

    /// Not written. See the message.
    Error,
}

/// The result of a command, as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Success or error.
    pub status: Status,

    /// Human readable detail.
    pub message: String,
}

impl CommandOutcome {
    /// A successful outcome.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
        }
    }

    /// A failed outcome.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
        }
    }

    /// True if the command was written.
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// An example of a successful outcome.
    pub fn example_success() -> Self {
        Self::success("Position set to 50%")
    }

    /// An example of a failed outcome.
    pub fn example_error() -> Self {
        Self::error(Error::NotConnected.to_string())
    }
}

impl From<Error> for CommandOutcome {
    fn from(e: Error) -> Self {
        Self::error(e.to_string())
    }
}

impl Display for CommandOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Status::Success => write!(f, "ok: {}", self.message),
            Status::Error => write!(f, "error: {}", self.message),
        }
    }
}
