use std::fmt::Display;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::serial::error::SerialPortError;

/// A byte stream to and from a device.
///
/// Real serial ports and in-memory mocks both qualify.
pub trait SerialIo: AsyncRead + AsyncWrite + Send + Unpin {}

/// Automatically provide [`SerialIo`] for anything that reads and writes.
impl<T> SerialIo for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// What is needed to acquire a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Likely `COMx` on Windows and `/dev/ttyUSBx` or similar on unix.
    pub port: String,

    /// The baud rate.
    pub baud: u32,
}

impl DeviceSettings {
    /// New settings.
    pub fn new(port: &str, baud: u32) -> Self {
        Self {
            port: port.into(),
            baud,
        }
    }
}

impl Display for DeviceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.port, self.baud)
    }
}

/// Something which is able to acquire exclusive access to a device.
pub trait Connector: Send + Sync {
    /// Attempt to acquire the device.
    ///
    /// Fails if the device does not exist, is busy, or may not be accessed.
    fn connect(
        &self,
        settings: &DeviceSettings,
    ) -> BoxFuture<'static, Result<Box<dyn SerialIo>, SerialPortError>>;
}
