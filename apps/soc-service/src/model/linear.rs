use super::SocEstimator;
use crate::ingest::{clamp_soc, Sample};

pub const REFERENCE_V_MIN: f64 = 3.0;
pub const REFERENCE_V_MAX: f64 = 4.2;

/// Voltage-only estimate between fixed empty/full reference voltages.
#[derive(Clone, Copy, Debug)]
pub struct LinearFallback {
    v_min: f64,
    v_max: f64,
}

impl Default for LinearFallback {
    fn default() -> Self {
        Self {
            v_min: REFERENCE_V_MIN,
            v_max: REFERENCE_V_MAX,
        }
    }
}

impl LinearFallback {
    pub fn predict_point(&self, sample: &Sample) -> f64 {
        clamp_soc((sample.voltage - self.v_min) / (self.v_max - self.v_min) * 100.0)
    }

    /// No temporal model: the newest sample decides.
    pub fn predict_sequence(&self, window: &[Sample]) -> f64 {
        window
            .last()
            .map(|sample| self.predict_point(sample))
            .unwrap_or(0.0)
    }
}

impl SocEstimator for LinearFallback {
    fn predict_point(&self, sample: &Sample) -> f64 {
        LinearFallback::predict_point(self, sample)
    }

    fn predict_sequence(&self, window: &[Sample]) -> f64 {
        LinearFallback::predict_sequence(self, window)
    }

    fn name(&self) -> &'static str {
        "linear"
    }
}
