mod ingestor;
mod rolling;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use ingestor::BatchResult;
pub use types::{
    clamp_soc, epoch_seconds, mean_soc, EstimateKind, PredictionRecord, Sample, SOC_MAX, SOC_MIN,
};

use crate::model::{SocEstimator, SocPredictor};
use crate::stats::IngestStats;
use std::sync::Arc;

/// The one write path into per-device state. Both the MQTT listener and the HTTP
/// handlers hold a clone of this.
pub struct SocIngestor<E: SocEstimator = SocPredictor> {
    store: Arc<state::StateStore>,
    estimator: Arc<E>,
    stats: Arc<IngestStats>,
}

impl<E: SocEstimator> Clone for SocIngestor<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            estimator: self.estimator.clone(),
            stats: self.stats.clone(),
        }
    }
}
