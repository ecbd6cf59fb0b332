mod linear;
mod lstm;

pub use linear::LinearFallback;
pub use lstm::LstmModel;

use crate::ingest::Sample;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse model weights: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("model shape mismatch: {0}")]
    Shape(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Capability every SoC estimator provides. Both methods return a value in [0, 100]
/// and never fail; recovery from internal errors is the implementor's job.
pub trait SocEstimator: Send + Sync {
    fn predict_point(&self, sample: &Sample) -> f64;

    fn predict_sequence(&self, window: &[Sample]) -> f64;

    fn name(&self) -> &'static str;

    /// Calls that failed inside the primary model and were answered by a fallback.
    fn recoveries(&self) -> u64 {
        0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelBackend {
    Lstm,
    Linear,
}

impl FromStr for ModelBackend {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "lstm" | "torch" | "trained" => Ok(Self::Lstm),
            "linear" | "dummy" | "fallback" => Ok(Self::Linear),
            other => Err(format!("unknown model backend {other:?}")),
        }
    }
}

impl fmt::Display for ModelBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lstm => f.write_str("lstm"),
            Self::Linear => f.write_str("linear"),
        }
    }
}

/// The estimator chosen once at startup.
#[derive(Debug)]
pub enum SocPredictor {
    Sequence {
        model: LstmModel,
        fallback: LinearFallback,
        recoveries: AtomicU64,
    },
    Linear(LinearFallback),
}

impl SocPredictor {
    pub fn load(backend: ModelBackend, path: &Path) -> Self {
        match backend {
            ModelBackend::Linear => {
                tracing::info!("using linear SoC estimator");
                Self::Linear(LinearFallback::default())
            }
            ModelBackend::Lstm => match LstmModel::from_file(path) {
                Ok(model) => {
                    tracing::info!(
                        path = %path.display(),
                        layers = model.layer_count(),
                        hidden = model.hidden_size(),
                        "loaded LSTM SoC model"
                    );
                    Self::trained(model)
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to load SoC model; falling back to linear estimator"
                    );
                    Self::Linear(LinearFallback::default())
                }
            },
        }
    }

    pub fn trained(model: LstmModel) -> Self {
        Self::Sequence {
            model,
            fallback: LinearFallback::default(),
            recoveries: AtomicU64::new(0),
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self, Self::Sequence { .. })
    }
}

fn recover(
    err: ModelError,
    newest: Option<&Sample>,
    fallback: &LinearFallback,
    recoveries: &AtomicU64,
) -> f64 {
    recoveries.fetch_add(1, Ordering::Relaxed);
    tracing::warn!(error = %err, "LSTM inference failed; answering with linear estimate");
    newest.map(|s| fallback.predict_point(s)).unwrap_or(0.0)
}

impl SocEstimator for SocPredictor {
    fn predict_point(&self, sample: &Sample) -> f64 {
        match self {
            Self::Sequence {
                model,
                fallback,
                recoveries,
            } => model
                .predict(std::slice::from_ref(sample))
                .unwrap_or_else(|err| recover(err, Some(sample), fallback, recoveries)),
            Self::Linear(fallback) => fallback.predict_point(sample),
        }
    }

    fn predict_sequence(&self, window: &[Sample]) -> f64 {
        match self {
            Self::Sequence {
                model,
                fallback,
                recoveries,
            } => model
                .predict(window)
                .unwrap_or_else(|err| recover(err, window.last(), fallback, recoveries)),
            Self::Linear(fallback) => fallback.predict_sequence(window),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Sequence { .. } => "lstm",
            Self::Linear(_) => "linear",
        }
    }

    fn recoveries(&self) -> u64 {
        match self {
            Self::Sequence { recoveries, .. } => recoveries.load(Ordering::Relaxed),
            Self::Linear(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn backend_parses_aliases() {
        assert_eq!("torch".parse::<ModelBackend>(), Ok(ModelBackend::Lstm));
        assert_eq!(" LSTM ".parse::<ModelBackend>(), Ok(ModelBackend::Lstm));
        assert_eq!("dummy".parse::<ModelBackend>(), Ok(ModelBackend::Linear));
        assert!("onnx".parse::<ModelBackend>().is_err());
    }

    #[test]
    fn missing_model_file_falls_back_to_linear() {
        let dir = tempfile::tempdir().expect("tempdir");
        let predictor = SocPredictor::load(ModelBackend::Lstm, &dir.path().join("absent.json"));
        assert!(!predictor.is_trained());
        assert_eq!(predictor.name(), "linear");
        let soc = predictor.predict_point(&Sample::new(3.6, 0.0, 25.0));
        assert!((soc - 50.0).abs() < 1e-9);
    }

    #[test]
    fn garbage_model_file_falls_back_to_linear() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(b"\x80\x02 not a weights document").expect("write");
        let predictor = SocPredictor::load(ModelBackend::Lstm, file.path());
        assert!(!predictor.is_trained());
    }

    #[test]
    fn linear_backend_ignores_model_path() {
        let predictor = SocPredictor::load(ModelBackend::Linear, Path::new("/nonexistent"));
        assert_eq!(predictor.name(), "linear");
        assert_eq!(predictor.recoveries(), 0);
    }

    #[test]
    fn valid_model_file_loads_trained_backend() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(lstm::tests::saturated_model_json(100.0, 0.0).as_bytes())
            .expect("write");
        let predictor = SocPredictor::load(ModelBackend::Lstm, file.path());
        assert!(predictor.is_trained());
        let soc = predictor.predict_sequence(&[Sample::new(3.7, -1.0, 25.0); 4]);
        assert!((soc - 100.0 * 1f64.tanh()).abs() < 1e-3);
    }

    #[test]
    fn inference_failure_recovers_with_linear_estimate() {
        let model = LstmModel::from_json(&lstm::tests::saturated_model_json(1e308, 1.5e308))
            .expect("model parses");
        let predictor = SocPredictor::trained(model);
        let window = [Sample::new(3.0, 0.0, 25.0), Sample::new(4.2, 0.0, 25.0)];
        let soc = predictor.predict_sequence(&window);
        assert_eq!(soc, 100.0);
        let point = predictor.predict_point(&Sample::new(3.0, 0.0, 25.0));
        assert_eq!(point, 0.0);
        assert_eq!(predictor.recoveries(), 2);
    }

    #[test]
    fn empty_window_recovers_to_zero() {
        let model = LstmModel::from_json(&lstm::tests::saturated_model_json(100.0, 0.0))
            .expect("model parses");
        let predictor = SocPredictor::trained(model);
        assert_eq!(predictor.predict_sequence(&[]), 0.0);
        assert_eq!(predictor.recoveries(), 1);
    }
}
