use crate::upload::UploadError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::UnsupportedFileType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            UploadError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::MissingFile
            | UploadError::Multipart(_)
            | UploadError::Csv(_)
            | UploadError::Excel(_)
            | UploadError::InvalidNumber { .. } => StatusCode::BAD_REQUEST,
        };
        tracing::warn!(error = %err, status = %status, "rejected upload");
        Self::new(status, err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        tracing::error!(error = %err, "ingest task failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "ingest task failed")
    }
}

pub type AppResult<T> = Result<T, AppError>;
