use std::{io, time::Duration};

use thiserror::Error;

/// Anything that can go wrong at the device boundary.
#[derive(Debug, Error)]
pub enum SerialPortError {
    /// IO related errors.
    #[error("Underlying IO problem: {0}")]
    Io(#[from] io::Error),

    /// The port could not be opened.
    #[error("Could not open port: {0}")]
    Open(#[from] tokio_serial::Error),

    /// No port with this name exists.
    #[error("No such port: `{0}`")]
    NoSuchPort(String),

    /// Someone else holds the port.
    #[error("Port `{0}` is busy")]
    Busy(String),

    /// Serial port disconnected.
    #[error("Serial port disconnected")]
    Disconnected,

    /// The device did not respond in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}
