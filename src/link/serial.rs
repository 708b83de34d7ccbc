//! A device attached to a real serial port.

use tokio_serial::SerialPortBuilderExt;

use super::{Connector, DeviceIo};
use crate::{config::SerialSettings, error::Error};

/// Opens serial ports with tokio-serial.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(&self, port: &str, settings: &SerialSettings) -> Result<Box<dyn DeviceIo>, Error> {
        let serial_stream = tokio_serial::new(port, settings.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(settings.read_timeout())
            .open_native_async()
            .map_err(|e| Error::ConnectionFailed {
                port: port.to_owned(),
                problem: e.to_string(),
            })?;

        Ok(Box::new(serial_stream))
    }
}
