use crate::ingest::Sample;
use serde::Deserialize;
use std::borrow::Cow;

pub const DEFAULT_TEMPERATURE: f64 = 25.0;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid telemetry JSON: {0}")]
    Json(#[from] simd_json::Error),
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("field {field} is not a number: {raw:?}")]
    InvalidNumber { field: &'static str, raw: String },
    #[error("field {field} is not finite")]
    NonFinite { field: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryMessage {
    pub device_id: String,
    pub sample: Sample,
}

#[derive(Debug, Deserialize)]
struct BorrowedTelemetry<'a> {
    #[serde(default, borrow)]
    device_id: Option<Cow<'a, str>>,
    #[serde(rename = "Voltage", default, borrow)]
    voltage: Option<Numeric<'a>>,
    #[serde(rename = "Current", default, borrow)]
    current: Option<Numeric<'a>>,
    #[serde(rename = "Temperature", default, borrow)]
    temperature: Option<Numeric<'a>>,
}

/// Publishers send numbers either bare or quoted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Numeric<'a> {
    Num(f64),
    Str(#[serde(borrow)] Cow<'a, str>),
}

impl<'a> Numeric<'a> {
    fn to_f64(&self, field: &'static str) -> Result<f64, TelemetryError> {
        let value = match self {
            Numeric::Num(value) => *value,
            Numeric::Str(raw) => {
                raw.trim()
                    .parse::<f64>()
                    .map_err(|_| TelemetryError::InvalidNumber {
                        field,
                        raw: raw.to_string(),
                    })?
            }
        };
        if !value.is_finite() {
            return Err(TelemetryError::NonFinite { field });
        }
        Ok(value)
    }
}

/// Decode one bus message. `device_id` falls back to `default_device_id` when absent or
/// blank, `Temperature` to 25.
pub fn parse_telemetry_payload(
    payload: &mut [u8],
    default_device_id: &str,
) -> Result<TelemetryMessage, TelemetryError> {
    let telemetry: BorrowedTelemetry = simd_json::from_slice(payload)?;

    let voltage = telemetry
        .voltage
        .as_ref()
        .ok_or(TelemetryError::MissingField("Voltage"))?
        .to_f64("Voltage")?;
    let current = telemetry
        .current
        .as_ref()
        .ok_or(TelemetryError::MissingField("Current"))?
        .to_f64("Current")?;
    let temperature = match telemetry.temperature.as_ref() {
        Some(raw) => raw.to_f64("Temperature")?,
        None => DEFAULT_TEMPERATURE,
    };

    let device_id = telemetry
        .device_id
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default_device_id)
        .to_string();

    Ok(TelemetryMessage {
        device_id,
        sample: Sample::new(voltage, current, temperature),
    })
}
