use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// One set of sensor readings from the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    /// Magnetic field, X axis.
    pub magnetic_x: f64,

    /// Magnetic field, Y axis.
    pub magnetic_y: f64,

    /// Magnetic field, Z axis.
    pub magnetic_z: f64,

    /// The output value the firmware computes from the axes.
    pub output: f64,

    /// Distance reading.
    /// Older firmware sends four fields only, in which case this is `None`.
    pub distance: Option<f64>,
}

impl TelemetryRecord {
    /// An example record.
    pub fn example() -> Self {
        Self {
            magnetic_x: 1.0,
            magnetic_y: 2.0,
            magnetic_z: 3.0,
            output: 4.0,
            distance: Some(5.0),
        }
    }
}

impl Display for TelemetryRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "x: {}, y: {}, z: {}, output: {}",
            self.magnetic_x, self.magnetic_y, self.magnetic_z, self.output
        )?;

        if let Some(distance) = self.distance {
            write!(f, ", distance: {distance}")?;
        }

        Ok(())
    }
}

/// What subscribers receive.
/// One event per decoded device line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// The device sent sensor readings.
    SensorData(TelemetryRecord),

    /// The device sent something which is not telemetry,
    /// for example an acknowledgement of a command.
    CommandResponse(String),
}

impl TelemetryEvent {
    /// An example sensor data event.
    pub fn example_sensor_data() -> Self {
        Self::SensorData(TelemetryRecord::example())
    }

    /// An example command response event.
    pub fn example_command_response() -> Self {
        Self::CommandResponse("OK position 3.0".into())
    }

    /// Turn an event into serialized json.
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Display for TelemetryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryEvent::SensorData(record) => write!(f, "sensor data: {record}"),
            TelemetryEvent::CommandResponse(response) => {
                write!(f, "command response: `{response}`")
            }
        }
    }
}
