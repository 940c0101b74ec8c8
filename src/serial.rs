use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Serial port related errors.
pub mod error;

/// Opening real serial ports and listing them.
pub mod serial_port;

/// Codecs for encoding/decoding messages to/from wire.
pub mod codecs;

/// A line as read from a device.
///
/// Bytes are decoded as UTF-8, replacing bad sequences.
/// The line terminator is kept as-is, so `"OK\r\n"` stays `"OK\r\n"`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Deserialize, Serialize)]
pub struct SerialLine(String);

impl SerialLine {
    /// Create a serial line from bytes, replacing any bad utf8 bytes.
    pub fn new_lossy<B: AsRef<[u8]>>(bytes: B) -> Self {
        Self(String::from_utf8_lossy(bytes.as_ref()).into_owned())
    }

    /// Borrowed form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The owned string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl<T: AsRef<str>> From<T> for SerialLine {
    fn from(string_like: T) -> Self {
        Self(string_like.as_ref().into())
    }
}

impl Display for SerialLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.0.chars().take(48).collect::<String>();

        write!(f, "{}", s.trim())
    }
}
