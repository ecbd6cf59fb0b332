use crate::ingest::EstimateKind;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Mutex, PoisonError,
};

#[derive(Debug)]
pub struct IngestStats {
    pub observations: AtomicU64,
    pub point_estimates: AtomicU64,
    pub sequence_estimates: AtomicU64,
    pub dropped_messages: AtomicU64,
    pub mqtt_connected: AtomicBool,
    pub last_error: Mutex<Option<String>>,
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            observations: AtomicU64::new(0),
            point_estimates: AtomicU64::new(0),
            sequence_estimates: AtomicU64::new(0),
            dropped_messages: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn record_estimate(&self, kind: EstimateKind) {
        self.observations.fetch_add(1, Ordering::Relaxed);
        match kind {
            EstimateKind::Point => self.point_estimates.fetch_add(1, Ordering::Relaxed),
            EstimateKind::Sequence => self.sequence_estimates.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_dropped(&self, err: impl Into<String>) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
        self.record_error(err);
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    pub fn record_error(&self, err: impl Into<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.into());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            observations: self.observations.load(Ordering::Relaxed),
            point_estimates: self.point_estimates.load(Ordering::Relaxed),
            sequence_estimates: self.sequence_estimates.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            mqtt_connected: self.mqtt_connected.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    pub observations: u64,
    pub point_estimates: u64,
    pub sequence_estimates: u64,
    pub dropped_messages: u64,
    pub mqtt_connected: bool,
    pub last_error: Option<String>,
}
