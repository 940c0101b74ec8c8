use std::{net::IpAddr, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The longest a single device read may block.
/// Bounds both how long a partial line is held back and how quickly the reader notices closing.
pub const MAX_READ_TIMEOUT_MS: u64 = 50;

/// The configuration used for running the server.
///
/// Every field may be omitted from a configuration file, the defaults are then used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Which address to listen on.
    pub listen_address: String,

    /// How long a device read may block before buffered output is flushed
    /// as a (partial) line. At most [`MAX_READ_TIMEOUT_MS`].
    pub read_timeout_ms: u64,

    /// How long acquiring a device may take.
    pub open_timeout_ms: u64,

    /// How long closing waits for the reader to stop before aborting it.
    pub close_timeout_ms: u64,

    /// How long a write to the device may take.
    pub write_timeout_ms: u64,

    /// How long a websocket send to a subscriber may take before the subscriber is dropped.
    pub send_timeout_ms: u64,

    /// How many undelivered messages a subscriber may have queued.
    pub subscriber_capacity: usize,

    /// A directory with a web UI to serve, if any.
    pub static_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".into(),
            read_timeout_ms: MAX_READ_TIMEOUT_MS,
            open_timeout_ms: 2000,
            close_timeout_ms: 1000,
            write_timeout_ms: 1000,
            send_timeout_ms: 1000,
            subscriber_capacity: 1024,
            static_dir: None,
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Could not parse configuration: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            listen_address: "0.0.0.0".into(),
            static_dir: Some(PathBuf::from("frontend")),
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .unwrap_or_else(|e| format!("<configuration could not be serialized: {e}>"))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let path = p.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| Error::BadConfig(format!("Could not read {path:?}: {e}")))?;

        Self::deserialize(&s)
    }

    /// See [`Config::read_timeout_ms`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// See [`Config::open_timeout_ms`].
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// See [`Config::close_timeout_ms`].
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// See [`Config::write_timeout_ms`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// See [`Config::send_timeout_ms`].
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// The address to listen on.
    pub fn listen_ip(&self) -> Result<IpAddr, Error> {
        self.listen_address.parse().map_err(|e| {
            Error::BadConfig(format!(
                "The listen address `{}` is not an IP address: {e}",
                self.listen_address
            ))
        })
    }

    fn check_timeouts(&self) -> Result<(), Error> {
        for (name, value) in [
            ("open_timeout_ms", self.open_timeout_ms),
            ("close_timeout_ms", self.close_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
            ("send_timeout_ms", self.send_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::BadConfig(format!("`{name}` must be above zero")));
            }
        }

        if !(1..=MAX_READ_TIMEOUT_MS).contains(&self.read_timeout_ms) {
            return Err(Error::BadConfig(format!(
                "`read_timeout_ms` must be between 1 and {MAX_READ_TIMEOUT_MS}, was {}",
                self.read_timeout_ms
            )));
        }

        Ok(())
    }

    fn check_capacity(&self) -> Result<(), Error> {
        if self.subscriber_capacity == 0 {
            Err(Error::BadConfig(
                "`subscriber_capacity` must be above zero, the status snapshot needs room".into(),
            ))
        } else {
            Ok(())
        }
    }

    /// Check that the configuration makes sense.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_timeouts()?;
        self.check_capacity()?;
        self.listen_ip()?;

        Ok(())
    }
}
