use crate::error::AppResult;
use crate::ingest::{BatchResult, PredictionRecord, Sample, SocIngestor};
use crate::model::SocEstimator;
use crate::stats::StatsSnapshot;
use crate::upload::{read_samples, ColumnDefaults, TabularFormat, UploadError};
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Clone)]
pub struct HttpState {
    pub ingestor: SocIngestor,
    pub upload_max_rows: usize,
    pub upload_max_bytes: usize,
    pub default_device_id: String,
    pub upload_device_id: String,
}

impl HttpState {
    fn device_or_default(&self, device_id: Option<String>) -> String {
        pick_device(device_id, &self.default_device_id)
    }
}

fn pick_device(device_id: Option<String>, fallback: &str) -> String {
    device_id
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    backend: &'static str,
    trained_model: bool,
    window_size: usize,
    history_size: usize,
    devices: usize,
    inference_recoveries: u64,
    #[serde(flatten)]
    stats: StatsSnapshot,
}

#[derive(Debug, Deserialize)]
struct PredictRequest {
    #[serde(rename = "Voltage")]
    voltage: f64,
    #[serde(rename = "Current")]
    current: f64,
    #[serde(rename = "Temperature")]
    temperature: f64,
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeviceQuery {
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum LastResponse {
    Record(PredictionRecord),
    Empty { device_id: String, predicted_soc: f64 },
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    items: Vec<PredictionRecord>,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn get_status(State(state): State<HttpState>) -> Json<StatusResponse> {
    let ingestor = &state.ingestor;
    let estimator = ingestor.estimator();
    Json(StatusResponse {
        backend: estimator.name(),
        trained_model: estimator.is_trained(),
        window_size: ingestor.window_size(),
        history_size: ingestor.history_size(),
        devices: ingestor.device_count(),
        inference_recoveries: estimator.recoveries(),
        stats: ingestor.stats().snapshot(),
    })
}

async fn post_predict(
    State(state): State<HttpState>,
    Json(payload): Json<PredictRequest>,
) -> AppResult<Json<PredictionRecord>> {
    let device_id = state.device_or_default(payload.device_id);
    let sample = Sample::new(payload.voltage, payload.current, payload.temperature);
    let ingestor = state.ingestor.clone();
    let record =
        tokio::task::spawn_blocking(move || ingestor.observe(&device_id, sample)).await?;
    Ok(Json(record))
}

fn multipart_error(err: MultipartError) -> UploadError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::TooLarge(err.body_text())
    } else {
        UploadError::Multipart(err.body_text())
    }
}

async fn post_upload(
    State(state): State<HttpState>,
    Query(query): Query<DeviceQuery>,
    mut multipart: Multipart,
) -> AppResult<Json<BatchResult>> {
    let mut samples = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let format = TabularFormat::from_filename(field.file_name().unwrap_or_default())?;
        let bytes = field.bytes().await.map_err(multipart_error)?;
        let max_rows = state.upload_max_rows;
        let parsed = tokio::task::spawn_blocking(move || {
            read_samples(format, bytes.to_vec(), ColumnDefaults::UPLOAD, max_rows)
        })
        .await??;
        samples = Some(parsed);
        break;
    }
    let samples = samples.ok_or(UploadError::MissingFile)?;

    let device_id = pick_device(query.device_id, &state.upload_device_id);
    tracing::debug!(device_id = %device_id, rows = samples.len(), "processing upload");
    let ingestor = state.ingestor.clone();
    let batch =
        tokio::task::spawn_blocking(move || ingestor.observe_batch(&device_id, samples)).await?;
    Ok(Json(batch))
}

async fn get_last(
    State(state): State<HttpState>,
    Query(query): Query<DeviceQuery>,
) -> Json<LastResponse> {
    let device_id = state.device_or_default(query.device_id);
    let response = match state.ingestor.last(&device_id) {
        Some(record) => LastResponse::Record(record),
        None => LastResponse::Empty {
            device_id,
            predicted_soc: 0.0,
        },
    };
    Json(response)
}

async fn get_history(
    State(state): State<HttpState>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let device_id = state.device_or_default(query.device_id);
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(HistoryResponse {
        items: state.ingestor.history(&device_id, limit),
    })
}

pub fn router(state: HttpState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.upload_max_bytes);
    Router::new()
        .route("/health", get(healthz))
        .route("/healthz", get(healthz))
        .route("/v1/status", get(get_status))
        .route("/predict", post(post_predict))
        .route("/upload", post(post_upload).layer(upload_limit))
        .route("/soc/last", get(get_last))
        .route("/soc/history", get(get_history))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
