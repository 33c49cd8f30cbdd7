use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;

use crate::inference::InferenceError;
use crate::storage::UploadError;

/// Every failure the HTTP layer reports. This is the only place that maps
/// error kinds to status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No file provided")]
    NoFile,
    #[error("No file selected")]
    NoFileSelected,
    #[error("Uploaded file is empty")]
    EmptyFile,
    #[error("Malformed upload: {0}")]
    Multipart(String),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<actix_multipart::MultipartError> for ApiError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        ApiError::Multipart(err.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NoFile
            | ApiError::NoFileSelected
            | ApiError::EmptyFile
            | ApiError::Multipart(_)
            | ApiError::Upload(UploadError::InvalidFormat(_)) => StatusCode::BAD_REQUEST,
            ApiError::Upload(UploadError::FileTooLarge(_)) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Inference(InferenceError::Decode(_)) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upload(UploadError::Io(_))
            | ApiError::Inference(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{}", self);
        } else {
            log::warn!("{}", self);
        }
        HttpResponse::build(status).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}
