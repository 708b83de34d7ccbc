use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Fixed serial parameters.
/// Framing is always 8 data bits, no parity, one stop bit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SerialSettings {
    /// Baud rate.
    pub baud_rate: u32,

    /// Upper bound on a single read during verification.
    pub read_timeout_ms: u64,

    /// Upper bound on a single write.
    pub write_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
        }
    }
}

impl SerialSettings {
    /// See [`SerialSettings::read_timeout_ms`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// See [`SerialSettings::write_timeout_ms`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Timing of the device link state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LinkSettings {
    /// How long to let the device reset after opening the port,
    /// before probing it.
    pub settle_ms: u64,

    /// How many lines to read while waiting for `PONG` or telemetry.
    pub probe_attempts: u32,

    /// A ready link with no successful read for this long is degraded.
    pub stale_after_ms: u64,

    /// Minimum time between reconnect attempts.
    pub reconnect_cooldown_ms: u64,

    /// How long the read loop waits when no data is pending.
    pub poll_interval_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            settle_ms: 2000,
            probe_attempts: 5,
            stale_after_ms: 5000,
            reconnect_cooldown_ms: 3000,
            poll_interval_ms: 20,
        }
    }
}

impl LinkSettings {
    /// See [`LinkSettings::settle_ms`].
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// See [`LinkSettings::stale_after_ms`].
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    /// See [`LinkSettings::reconnect_cooldown_ms`].
    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_millis(self.reconnect_cooldown_ms)
    }

    /// See [`LinkSettings::poll_interval_ms`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// The configuration used for running the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Use this serial port instead of scanning for one.
    /// Likely "/dev/ttyACMx" or "COMx".
    pub device: Option<String>,

    /// Lowercase substrings which identify the device when scanning ports.
    /// Matched against the port description and hardware id.
    pub port_markers: Vec<String>,

    /// The HTTP/websocket port to listen on.
    pub listen_port: u16,

    /// Serial port parameters.
    pub serial: SerialSettings,

    /// Link state machine timing.
    pub link: LinkSettings,

    /// How many events may queue up for a single subscriber
    /// before it is considered too slow and dropped.
    pub subscriber_capacity: usize,

    /// Use an in-process simulated device instead of a serial port.
    pub mock_device: bool,
}

/// The default HTTP/websocket port.
pub const DEFAULT_LISTEN_PORT: u16 = 8000;

impl Default for Config {
    fn default() -> Self {
        Self {
            device: None,
            port_markers: crate::discovery::DEFAULT_MARKERS
                .iter()
                .map(|marker| marker.to_string())
                .collect(),
            listen_port: DEFAULT_LISTEN_PORT,
            serial: SerialSettings::default(),
            link: LinkSettings::default(),
            subscriber_capacity: 64,
            mock_device: false,
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
            .map_err(|e| Error::BadConfig(format!("Not valid RON: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            device: Some("/dev/ttyACM0".into()),
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::InternalIssue(format!("Could not serialize config: {e}")))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let path = p.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| Error::BadConfig(format!("Could not read {path:?}: {e}")))?;

        Self::deserialize(&s)
    }

    fn check_serial(&self) -> Result<(), Error> {
        if self.serial.baud_rate == 0 {
            return Err(Error::BadConfig("The baud rate must be non-zero".into()));
        }

        if self.serial.read_timeout_ms == 0 || self.serial.write_timeout_ms == 0 {
            return Err(Error::BadConfig(
                "Serial read and write timeouts must be non-zero, or reads/writes could block forever".into(),
            ));
        }

        Ok(())
    }

    fn check_link(&self) -> Result<(), Error> {
        let link = &self.link;

        if link.probe_attempts == 0 {
            return Err(Error::BadConfig(
                "At least one probe attempt is needed to verify the device".into(),
            ));
        }

        if link.poll_interval_ms == 0 {
            return Err(Error::BadConfig(
                "The poll interval must be non-zero".into(),
            ));
        }

        if link.stale_after_ms <= link.poll_interval_ms {
            return Err(Error::BadConfig(format!(
                "The stale threshold ({} ms) must be longer than the poll interval ({} ms)",
                link.stale_after_ms, link.poll_interval_ms
            )));
        }

        Ok(())
    }

    fn check_markers(&self) -> Result<(), Error> {
        if let Some(index) = self
            .port_markers
            .iter()
            .position(|marker| marker.trim().is_empty())
        {
            return Err(Error::BadConfig(format!(
                "The port marker with index {index} (zero indexed) is empty, it would match every port"
            )));
        }

        Ok(())
    }

    /// Check that the configuration makes sense.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_serial()?;
        self.check_link()?;
        self.check_markers()?;

        if self.subscriber_capacity == 0 {
            return Err(Error::BadConfig(
                "Subscribers need room for at least one event".into(),
            ));
        }

        Ok(())
    }
}
