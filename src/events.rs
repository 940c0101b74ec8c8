use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::serial::SerialLine;

/// The state of the (single) device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No device is held.
    #[default]
    Closed,

    /// The device is being acquired.
    Opening,

    /// The device is held and its output is streamed.
    Open,

    /// The device is being released.
    Closing,

    /// The device failed mid-session.
    /// Must be closed before it can be opened again.
    Error,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Opening => "opening",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Error => "error",
        };

        write!(f, "{s}")
    }
}

/// What subscribers are sent.
///
/// On the wire this is a JSON object tagged by `type`:
///
/// ```json
/// {"type":"status","state":"open"}
/// {"type":"data","line":"OK\r\n","ts":1700000000.25}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// The connection state changed (or, on subscribing, is).
    Status {
        /// The new state.
        state: ConnectionState,
    },

    /// The device produced a line.
    Data {
        /// The line, terminator included.
        line: String,

        /// When the server saw the line, in seconds since the epoch.
        ts: f64,
    },
}

impl OutboundMessage {
    /// A status message.
    pub fn status(state: ConnectionState) -> Self {
        Self::Status { state }
    }

    /// A data message.
    pub fn data(line: SerialLine, ts: f64) -> Self {
        Self::Data {
            line: line.into_string(),
            ts,
        }
    }

    /// An example of a status message.
    pub fn example_status() -> Self {
        Self::status(ConnectionState::Open)
    }

    /// An example of a data message.
    pub fn example_data() -> Self {
        Self::data("OK\r\n".into(), 1_700_000_000.25)
    }

    /// Serialize to JSON.
    pub fn serialize(&self) -> String {
        // Only strings, floats and unit variants within, which always serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Borrow as the status variant.
    pub fn as_status(&self) -> Option<ConnectionState> {
        if let Self::Status { state } = self {
            Some(*state)
        } else {
            None
        }
    }

    /// Borrow the line, if this is the data variant.
    pub fn as_data(&self) -> Option<&str> {
        if let Self::Data { line, .. } = self {
            Some(line)
        } else {
            None
        }
    }
}

impl Display for OutboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboundMessage::Status { state } => write!(f, "status: {state}"),
            OutboundMessage::Data { line, .. } => {
                write!(f, "data: {}", SerialLine::from(line))
            }
        }
    }
}

/// Seconds since the epoch, with sub-second precision.
pub(crate) fn now_ts() -> f64 {
    let now = chrono::Utc::now();

    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}
