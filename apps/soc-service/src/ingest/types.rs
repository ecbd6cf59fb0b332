use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SOC_MIN: f64 = 0.0;
pub const SOC_MAX: f64 = 100.0;

/// One battery telemetry reading. Values are passed through untouched; out-of-range
/// physics is the estimator's problem, not the ingest path's.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
}

impl Sample {
    pub fn new(voltage: f64, current: f64, temperature: f64) -> Self {
        Self {
            voltage,
            current,
            temperature,
        }
    }

    pub fn features(&self) -> [f64; 3] {
        [self.voltage, self.current, self.temperature]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateKind {
    Point,
    Sequence,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub device_id: String,
    pub predicted_soc: f64,
    #[serde(with = "epoch_seconds")]
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
}

impl PredictionRecord {
    pub(in crate::ingest) fn new(
        device_id: &str,
        predicted_soc: f64,
        timestamp: DateTime<Utc>,
        sample: &Sample,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            predicted_soc: clamp_soc(predicted_soc),
            timestamp,
            voltage: sample.voltage,
            current: sample.current,
            temperature: sample.temperature,
        }
    }

    pub fn sample(&self) -> Sample {
        Sample::new(self.voltage, self.current, self.temperature)
    }
}

/// Timestamps travel as fractional Unix seconds, microsecond precision.
pub mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn to_f64(ts: &DateTime<Utc>) -> f64 {
        ts.timestamp_micros() as f64 / 1e6
    }

    pub fn from_f64(secs: f64) -> Option<DateTime<Utc>> {
        if !secs.is_finite() {
            return None;
        }
        DateTime::from_timestamp_micros((secs * 1e6).round() as i64)
    }

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(to_f64(ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        from_f64(secs).ok_or_else(|| de::Error::custom(format!("timestamp out of range: {secs}")))
    }
}

/// Clamp an estimate into [0, 100]. NaN collapses to 0 so a record never carries it.
pub fn clamp_soc(value: f64) -> f64 {
    if value.is_nan() {
        return SOC_MIN;
    }
    value.clamp(SOC_MIN, SOC_MAX)
}

/// Mean of `predicted_soc`, 0 for an empty batch.
pub fn mean_soc(records: &[PredictionRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    records.iter().map(|r| r.predicted_soc).sum::<f64>() / records.len() as f64
}
