//! The HTTP control surface.
//!
//! Each handler validates its input and then calls into the [`ConnectionManager`].

use axum::{extract::rejection::JsonRejection, Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::Error,
    events::ConnectionState,
    manager::{ConnectionManager, Opened},
    serial::serial_port::{list_ports, PortInfo},
};

/// The lowest baud rate accepted.
pub const MIN_BAUD: u32 = 1200;

/// The highest baud rate accepted.
pub const MAX_BAUD: u32 = 10_000_000;

/// Request body for opening the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    /// Serial port, e.g. `COM3` or `/dev/ttyUSB0`.
    pub port: String,

    /// The baud rate.
    pub baud: u32,
}

impl OpenRequest {
    /// An example request.
    pub fn example() -> Self {
        Self {
            port: "/dev/ttyUSB0".into(),
            baud: 115_200,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.port.trim().is_empty() {
            return Err(Error::BadRequest("`port` must not be empty".into()));
        }

        if !(MIN_BAUD..=MAX_BAUD).contains(&self.baud) {
            return Err(Error::BadRequest(format!(
                "`baud` must be between {MIN_BAUD} and {MAX_BAUD}, was {}",
                self.baud
            )));
        }

        Ok(())
    }
}

/// Request body for writing a command to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// The command. A line terminator is appended when writing.
    pub cmd: String,
}

impl WriteRequest {
    /// An example request.
    pub fn example() -> Self {
        Self {
            cmd: "STATUS".into(),
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.cmd.trim().is_empty() {
            Err(Error::BadRequest("`cmd` must not be empty".into()))
        } else {
            Ok(())
        }
    }
}

/// Response to a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Written {
    /// Bytes written, line terminator included.
    pub written: usize,
}

/// The connection state, as reported by closing or asking for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateResponse {
    /// The state.
    pub state: ConnectionState,
}

/// Serial devices found on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Devices {
    /// The devices, sorted by port name.
    pub devices: Vec<PortInfo>,
}

fn body<T>(request: Result<Json<T>, JsonRejection>) -> Result<T, Error> {
    request
        .map(|Json(request)| request)
        .map_err(|rejection| Error::BadRequest(rejection.to_string()))
}

pub(crate) async fn open(
    Extension(manager): Extension<ConnectionManager>,
    request: Result<Json<OpenRequest>, JsonRejection>,
) -> Result<Json<Opened>, Error> {
    let request = body(request)?;
    request.validate()?;

    info!(port = %request.port, baud = request.baud, "Open requested");

    Ok(Json(manager.open(&request.port, request.baud).await?))
}

pub(crate) async fn close(
    Extension(manager): Extension<ConnectionManager>,
) -> Json<StateResponse> {
    info!("Close requested");

    Json(StateResponse {
        state: manager.close().await,
    })
}

pub(crate) async fn write(
    Extension(manager): Extension<ConnectionManager>,
    request: Result<Json<WriteRequest>, JsonRejection>,
) -> Result<Json<Written>, Error> {
    let request = body(request)?;
    request.validate()?;

    debug!(cmd = %request.cmd, "Write requested");

    let written = manager.write(&request.cmd).await?;

    Ok(Json(Written { written }))
}

pub(crate) async fn state(Extension(manager): Extension<ConnectionManager>) -> Json<StateResponse> {
    Json(StateResponse {
        state: manager.state(),
    })
}

pub(crate) async fn devices() -> Json<Devices> {
    // Enumeration may touch the OS for a while.
    let devices = tokio::task::spawn_blocking(list_ports)
        .await
        .unwrap_or_default();

    Json(Devices { devices })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn open_request_bounds() {
        let ok = |port: &str, baud| {
            OpenRequest {
                port: port.into(),
                baud,
            }
            .validate()
        };

        assert!(ok("COM3", 115_200).is_ok());
        assert!(ok("COM3", MIN_BAUD).is_ok());
        assert!(ok("COM3", MAX_BAUD).is_ok());

        assert!(matches!(ok("COM3", 300), Err(Error::BadRequest(_))));
        assert!(matches!(ok("COM3", MAX_BAUD + 1), Err(Error::BadRequest(_))));
        assert!(matches!(ok("", 115_200), Err(Error::BadRequest(_))));
        assert!(matches!(ok("  ", 115_200), Err(Error::BadRequest(_))));
    }

    #[test]
    fn write_request_needs_a_command() {
        assert!(WriteRequest::example().validate().is_ok());

        for cmd in ["", " ", "\r\n"] {
            let request = WriteRequest { cmd: cmd.into() };
            assert!(matches!(request.validate(), Err(Error::BadRequest(_))));
        }
    }

    #[test]
    fn wire_shapes() {
        assert_eq!(
            serde_json::to_string(&StateResponse {
                state: ConnectionState::Closed
            })
            .unwrap(),
            r#"{"state":"closed"}"#
        );
        assert_eq!(
            serde_json::to_string(&Written { written: 7 }).unwrap(),
            r#"{"written":7}"#
        );

        let request: OpenRequest =
            serde_json::from_str(r#"{"port":"COM3","baud":115200}"#).unwrap();
        assert_eq!(
            request,
            OpenRequest {
                port: "COM3".into(),
                baud: 115_200
            }
        );
    }
}
