use super::rolling::BoundedLog;
use super::types::{PredictionRecord, Sample};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Result of pushing a sample: the window length afterwards and, once the window is at
/// capacity, an ordered copy of it for the sequence estimator.
#[derive(Debug)]
pub(in crate::ingest) struct WindowView {
    pub(in crate::ingest) len: usize,
    pub(in crate::ingest) full: Option<Vec<Sample>>,
}

/// Per-device state. `lane` serializes whole observations for one device so window and
/// history appends keep call order; `window` and `history` are only held for the
/// push/append itself, so readers never wait on an estimator call.
#[derive(Debug)]
pub(in crate::ingest) struct DeviceState {
    lane: Mutex<()>,
    window: Mutex<BoundedLog<Sample>>,
    history: RwLock<BoundedLog<PredictionRecord>>,
}

impl DeviceState {
    fn new(window_size: usize, history_size: usize) -> Self {
        Self {
            lane: Mutex::new(()),
            window: Mutex::new(BoundedLog::new(window_size)),
            history: RwLock::new(BoundedLog::new(history_size)),
        }
    }

    pub(in crate::ingest) fn enter(&self) -> MutexGuard<'_, ()> {
        self.lane.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(in crate::ingest) fn append_sample(&self, sample: Sample) -> WindowView {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.push(sample);
        WindowView {
            len: window.len(),
            full: window.is_full().then(|| window.snapshot()),
        }
    }

    pub(in crate::ingest) fn append_history(&self, record: PredictionRecord) {
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        history.push(record);
    }

    pub(in crate::ingest) fn window(&self) -> Vec<Sample> {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    pub(in crate::ingest) fn last(&self) -> Option<PredictionRecord> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub(in crate::ingest) fn history(&self, limit: usize) -> Vec<PredictionRecord> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tail(limit)
    }

    #[cfg(test)]
    fn history_len(&self) -> usize {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Owns every device's state. Devices are created lazily and never evicted.
#[derive(Debug)]
pub(in crate::ingest) struct StateStore {
    window_size: usize,
    history_size: usize,
    devices: RwLock<HashMap<String, Arc<DeviceState>>>,
}

impl StateStore {
    pub(in crate::ingest) fn new(window_size: usize, history_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            history_size: history_size.max(1),
            devices: RwLock::new(HashMap::new()),
        }
    }

    pub(in crate::ingest) fn window_size(&self) -> usize {
        self.window_size
    }

    pub(in crate::ingest) fn history_size(&self) -> usize {
        self.history_size
    }

    pub(in crate::ingest) fn get(&self, device_id: &str) -> Option<Arc<DeviceState>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .cloned()
    }

    /// Insertion happens under the map's write lock, so two producers racing on a new
    /// id end up sharing one `DeviceState`.
    pub(in crate::ingest) fn get_or_create(&self, device_id: &str) -> Arc<DeviceState> {
        if let Some(existing) = self.get(device_id) {
            return existing;
        }
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        devices
            .entry(device_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(device_id, "tracking new device");
                Arc::new(DeviceState::new(self.window_size, self.history_size))
            })
            .clone()
    }

    pub(in crate::ingest) fn read_last(&self, device_id: &str) -> Option<PredictionRecord> {
        self.get(device_id).and_then(|device| device.last())
    }

    pub(in crate::ingest) fn read_history(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Vec<PredictionRecord> {
        self.get(device_id)
            .map(|device| device.history(limit))
            .unwrap_or_default()
    }

    pub(in crate::ingest) fn read_window(&self, device_id: &str) -> Vec<Sample> {
        self.get(device_id)
            .map(|device| device.window())
            .unwrap_or_default()
    }

    pub(in crate::ingest) fn device_count(&self) -> usize {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
