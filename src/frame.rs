//! Turns one line of device output into a [`TelemetryEvent`].
//!
//! Telemetry lines are comma separated numbers:
//! `x,y,z,output[,distance]`.
//! Anything without enough fields is a command response.
//! Telemetry-shaped lines with bad numbers are dropped.

use tracing::debug;

use crate::events::{TelemetryEvent, TelemetryRecord};

/// Separates fields in a telemetry line.
pub const FIELD_DELIMITER: char = ',';

/// x, y, z and output must be present.
pub const MIN_FIELDS: usize = 4;

/// Decode a line of device output.
///
/// Returns `None` for blank lines and for telemetry lines
/// which fail to parse. Never fails.
pub fn decode(line: &str) -> Option<TelemetryEvent> {
    let line = line.trim();

    if line.is_empty() {
        return None;
    }

    if !looks_like_telemetry(line) {
        return Some(TelemetryEvent::CommandResponse(line.to_owned()));
    }

    match parse_record(line) {
        Ok(record) => Some(TelemetryEvent::SensorData(record)),
        Err(field) => {
            debug!(%line, %field, "Dropping malformed telemetry line");
            None
        }
    }
}

/// True if the line has the delimiter and enough fields to be telemetry.
pub fn looks_like_telemetry(line: &str) -> bool {
    line.contains(FIELD_DELIMITER) && line.split(FIELD_DELIMITER).count() >= MIN_FIELDS
}

/// Firmware prints `nan` or `inf` for failed float reads; those are not numbers here.
fn number(field: &str) -> Option<f64> {
    field.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// On failure, the name of the field which did not parse.
fn parse_record(line: &str) -> Result<TelemetryRecord, &'static str> {
    let mut fields = line.split(FIELD_DELIMITER).map(str::trim);

    let mut next = |name: &'static str| -> Result<f64, &'static str> {
        fields.next().and_then(number).ok_or(name)
    };

    let magnetic_x = next("magneticX")?;
    let magnetic_y = next("magneticY")?;
    let magnetic_z = next("magneticZ")?;
    let output = next("output")?;

    let distance = match fields.next() {
        Some(field) => Some(number(field).ok_or("distance")?),
        None => None,
    };

    Ok(TelemetryRecord {
        magnetic_x,
        magnetic_y,
        magnetic_z,
        output,
        distance,
    })
}
