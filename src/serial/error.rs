use std::io;

use thiserror::Error;

/// Errors on the byte level of a serial link.
#[derive(Debug, Error)]
pub enum SerialPortError {
    /// IO related errors.
    #[error("Underlying IO problem: {0}")]
    IO(#[from] io::Error),
}
