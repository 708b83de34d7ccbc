use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that may occur in this library.
#[derive(Debug, Error, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub enum Error {
    /// No serial port matched the known device markers,
    /// and none was chosen manually.
    #[error("No matching serial port found")]
    PortNotFound,

    /// The serial port could not be opened.
    #[error("Could not open port `{port}`. Problem: {problem}")]
    ConnectionFailed {
        /// The port we tried to open.
        port: String,

        /// What went wrong.
        problem: String,
    },

    /// The device did not answer the probe nor send telemetry in time.
    /// The link is still used, but with degraded confidence.
    #[error("The device on `{0}` did not verify within the probe budget")]
    VerificationTimeout(String),

    /// Writing to the device failed.
    /// The link is marked degraded when this happens.
    #[error("Write to device failed: {0}")]
    WriteFailure(String),

    /// There is no ready device link.
    #[error("Device not connected")]
    NotConnected,

    /// The link is shutting down.
    #[error("Shutting down")]
    ShuttingDown,

    /// A command parameter was outside its allowed range.
    #[error("{0}")]
    Validation(String),

    /// Bad json.
    #[error("The request `{request}` could not be deserialized. Problem: {problem}")]
    BadJson {
        /// The problematic request.
        request: String,

        /// The deserialization issue.
        problem: String,
    },

    /// The websocket to the server failed.
    #[error("Websocket issue: {0}")]
    WebsocketIssue(String),

    /// The configuration is not valid.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// Something unexpected happened.
    #[error("Internal issue: {0}")]
    InternalIssue(String),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebsocketIssue(e.to_string())
    }
}

impl Error {
    /// Unwraps the inner problem if this is a bad config.
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        match self {
            Error::BadConfig(problem) => Ok(problem),
            other => Err(other),
        }
    }

    /// Unwraps the inner reason if this is a validation error.
    pub fn try_into_validation(self) -> Result<String, Self> {
        match self {
            Error::Validation(reason) => Ok(reason),
            other => Err(other),
        }
    }
}
