//! A simulated device endpoint.
//! Opening it starts the mock firmware on the far end of an in-memory pipe.
//!
//! Useful for testing implementations which would use
//! regular serial ports- but faster and more reliable.

use tokio::io::duplex;

use super::{Connector, DeviceIo};
use crate::{config::SerialSettings, error::Error, mock::MockDevice};

const PIPE_CAPACITY: usize = 16 * 1024;

impl Connector for MockDevice {
    fn open(&self, port: &str, _settings: &SerialSettings) -> Result<Box<dyn DeviceIo>, Error> {
        let connection_failed = |problem: &str| Error::ConnectionFailed {
            port: port.to_owned(),
            problem: problem.to_owned(),
        };

        if !self.is_plugged_in() {
            return Err(connection_failed("mock device is unplugged"));
        }

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(connection_failed("mock device needs a tokio runtime"));
        }

        let (host, device) = duplex(PIPE_CAPACITY);
        self.attach(device);

        Ok(Box::new(host))
    }
}
