//! Finding the serial port the device is attached to.

use std::{
    fmt::Display,
    io::{BufRead, Write},
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serialport::SerialPortType;
use tracing::{debug, info, warn};

use crate::error::Error;

/// Lowercase substrings which identify the device.
///
/// The vendor name, generic USB-serial markers, common bridge chips,
/// and the device node names macOS and Linux give CDC-ACM/USB-serial devices.
pub const DEFAULT_MARKERS: &[&str] = &[
    "arduino",
    "usb serial",
    "usb-serial",
    "ch340",
    "ch341",
    "cp210",
    "ftdi",
    "ft232",
    "pl2303",
    "wchusbserial",
    "usbmodem",
    "usbserial",
    "ttyacm",
    "ttyusb",
];

/// A serial port as seen when scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// What to open, e.g. `/dev/ttyACM0` or `COM3`.
    pub name: String,

    /// Human readable description.
    pub description: String,

    /// Hardware identifier, e.g. `USB VID:PID=2341:0043 SER=123`.
    pub hardware_id: String,
}

impl PortInfo {
    /// A port with only a name known.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            description: "n/a".into(),
            hardware_id: "n/a".into(),
        }
    }

    /// The lowercase haystack markers are matched against.
    ///
    /// The port name is included since on some platforms it is
    /// the only place the device class shows up.
    fn descriptor(&self) -> String {
        format!("{} {} {}", self.name, self.description, self.hardware_id).to_lowercase()
    }

    /// True if any marker is found in this port's descriptor.
    pub fn matches<S: AsRef<str>>(&self, markers: &[S]) -> bool {
        let descriptor = self.descriptor();

        markers
            .iter()
            .any(|marker| descriptor.contains(&marker.as_ref().to_lowercase()))
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let (description, hardware_id) = match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let description = [usb.manufacturer, usb.product]
                    .into_iter()
                    .flatten()
                    .join(" ");

                let mut hardware_id = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
                if let Some(serial_number) = usb.serial_number {
                    hardware_id += &format!(" SER={serial_number}");
                }

                let description = if description.is_empty() {
                    "USB Serial".to_owned()
                } else {
                    description
                };

                (description, hardware_id)
            }
            SerialPortType::PciPort => ("PCI".to_owned(), "PCI".to_owned()),
            SerialPortType::BluetoothPort => ("Bluetooth".to_owned(), "BLUETOOTH".to_owned()),
            SerialPortType::Unknown => ("n/a".to_owned(), "n/a".to_owned()),
        };

        Self {
            name: info.port_name,
            description,
            hardware_id,
        }
    }
}

impl Display for PortInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {} [{}]", self.name, self.description, self.hardware_id)
    }
}

/// Something which can list serial ports.
pub trait PortScanner: Send + Sync {
    /// List the ports currently present.
    fn scan(&self) -> Result<Vec<PortInfo>, Error>;
}

/// Lists the ports of this machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortScanner for SystemPorts {
    fn scan(&self) -> Result<Vec<PortInfo>, Error> {
        let ports = serialport::available_ports()
            .map_err(|e| Error::InternalIssue(format!("Could not list serial ports: {e}")))?;

        Ok(ports.into_iter().map(PortInfo::from).collect())
    }
}

/// Always lists the same ports.
/// Useful when the port is known up front.
#[derive(Debug, Default, Clone)]
pub struct FixedPorts(pub Vec<PortInfo>);

impl PortScanner for FixedPorts {
    fn scan(&self) -> Result<Vec<PortInfo>, Error> {
        Ok(self.0.clone())
    }
}

/// Pick the first port matching any marker.
pub fn select_port<'a, S: AsRef<str>>(ports: &'a [PortInfo], markers: &[S]) -> Option<&'a PortInfo> {
    ports.iter().find(|port| port.matches(markers))
}

/// Scan for ports and pick the first matching one.
///
/// When nothing matches, the available ports are logged so an operator
/// can put one in the configuration, and `None` is returned.
pub fn find_port<S: AsRef<str>>(scanner: &dyn PortScanner, markers: &[S]) -> Option<String> {
    let ports = match scanner.scan() {
        Ok(ports) => ports,
        Err(e) => {
            warn!(%e, "Port scan failed");
            return None;
        }
    };

    debug!(count = ports.len(), "Scanned serial ports");

    if let Some(port) = select_port(&ports, markers) {
        info!(%port, "Found device port");
        return Some(port.name.clone());
    }

    if ports.is_empty() {
        info!("No serial ports available");
    } else {
        warn!(
            ports = %ports.iter().join(", "),
            "No serial port matched the device markers"
        );
    }

    None
}

/// List the ports and let an operator pick one by number.
///
/// An empty or invalid answer picks nothing.
pub fn choose_port<R: BufRead, W: Write>(
    ports: &[PortInfo],
    mut input: R,
    mut output: W,
) -> Result<Option<String>, Error> {
    let io_err = |e: std::io::Error| Error::InternalIssue(format!("Port prompt failed: {e}"));

    if ports.is_empty() {
        writeln!(output, "No serial ports available").map_err(io_err)?;
        return Ok(None);
    }

    writeln!(output, "Available ports:").map_err(io_err)?;
    for (index, port) in ports.iter().enumerate() {
        writeln!(output, "  {}: {port}", index + 1).map_err(io_err)?;
    }
    write!(output, "Select a port number (empty to skip): ").map_err(io_err)?;
    output.flush().map_err(io_err)?;

    let mut answer = String::new();
    input.read_line(&mut answer).map_err(io_err)?;

    let choice = answer
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|number| number.checked_sub(1))
        .and_then(|index| ports.get(index));

    Ok(choice.map(|port| port.name.clone()))
}
