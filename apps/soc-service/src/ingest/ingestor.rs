use super::state::StateStore;
use super::types::{mean_soc, EstimateKind, PredictionRecord, Sample};
use super::SocIngestor;
use crate::model::SocEstimator;
use crate::stats::IngestStats;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone, Debug, Serialize)]
pub struct BatchResult {
    pub predicted_soc: f64,
    pub items: Vec<PredictionRecord>,
}

impl<E: SocEstimator> SocIngestor<E> {
    pub fn new(
        estimator: Arc<E>,
        window_size: usize,
        history_size: usize,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self {
            store: Arc::new(StateStore::new(window_size, history_size)),
            estimator,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    pub fn window_size(&self) -> usize {
        self.store.window_size()
    }

    pub fn history_size(&self) -> usize {
        self.store.history_size()
    }

    pub fn device_count(&self) -> usize {
        self.store.device_count()
    }

    /// Push `sample` into the device's window, estimate SoC (sequence model once the
    /// window is full, point estimate before that) and append the record to history.
    ///
    /// Observations for one device are applied in call order. The estimator runs on a
    /// window snapshot with neither the window nor the history locked, so readers of
    /// `last`/`history` only ever wait for a single push or append.
    pub fn observe(&self, device_id: &str, sample: Sample) -> PredictionRecord {
        let device = self.store.get_or_create(device_id);
        let _lane = device.enter();

        let view = device.append_sample(sample);
        let (soc, kind) = match view.full.as_deref() {
            Some(window) => (self.estimator.predict_sequence(window), EstimateKind::Sequence),
            None => (self.estimator.predict_point(&sample), EstimateKind::Point),
        };

        let record = PredictionRecord::new(device_id, soc, Utc::now(), &sample);
        device.append_history(record.clone());
        self.stats.record_estimate(kind);
        tracing::trace!(
            device_id,
            window_len = view.len,
            ?kind,
            soc = record.predicted_soc,
            "observed sample"
        );
        record
    }

    /// Observe each sample in order under one device id. An empty batch yields a mean
    /// of 0 and touches no state.
    pub fn observe_batch<I>(&self, device_id: &str, samples: I) -> BatchResult
    where
        I: IntoIterator<Item = Sample>,
    {
        let items: Vec<PredictionRecord> = samples
            .into_iter()
            .map(|sample| self.observe(device_id, sample))
            .collect();
        BatchResult {
            predicted_soc: mean_soc(&items),
            items,
        }
    }

    pub fn last(&self, device_id: &str) -> Option<PredictionRecord> {
        self.store.read_last(device_id)
    }

    /// Up to `limit` most recent records, oldest first.
    pub fn history(&self, device_id: &str, limit: usize) -> Vec<PredictionRecord> {
        self.store.read_history(device_id, limit)
    }

    pub fn window(&self, device_id: &str) -> Vec<Sample> {
        self.store.read_window(device_id)
    }
}
