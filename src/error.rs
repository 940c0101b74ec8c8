use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::serial::error::SerialPortError;

/// Errors thay may occur in this library.
#[derive(Debug, Error, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub enum Error {
    /// The operation is not legal in the current connection state.
    /// For example, opening while already open.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Acquisition, write or read failure at the device boundary.
    #[error("Device error: {0}")]
    DeviceError(String),

    /// A write was attempted while the device is not open.
    #[error("The serial port is not open")]
    NotOpen,

    /// The request had a bad shape, e.g. a missing field or an empty command.
    #[error("The request did not conform to valid usage. Problem: `{0}`")]
    BadRequest(String),

    /// Bad configuration.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// Something went wrong which the user can't do anything about.
    #[error("Internal issue: {0}")]
    InternalIssue(String),
}

impl From<SerialPortError> for Error {
    fn from(e: SerialPortError) -> Self {
        Self::DeviceError(e.to_string())
    }
}

impl Error {
    /// Get the bad config explanation, if this is the [`Error::BadConfig`] variant.
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }

    /// The HTTP status this error is reported with on the control surface.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidState(_) | Error::DeviceError(_) | Error::NotOpen => StatusCode::CONFLICT,
            Error::BadRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::BadConfig(_) | Error::InternalIssue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The body of an error response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Human readable explanation.
    pub detail: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            warn!(%self, "Request failed");
        } else {
            debug!(%self, "Request rejected");
        }

        let body = ErrorBody {
            detail: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
