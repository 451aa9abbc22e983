//! Conversion of pipeline errors into JSON HTTP responses

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineError;
use crate::resolver::ResolveError;

/// Non-standard status used when the client cancelled the request
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// JSON body of every error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// Errors a handler can return
#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    Classify(ResolveError),
    DuplicateRequest(String),
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        Self::Pipeline(error)
    }
}

/// Unreadable request bodies are input errors like any other
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Pipeline(PipelineError::InvalidInput(rejection.body_text()))
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Pipeline(error) => pipeline_status(error),
            Self::Classify(ResolveError::InvalidUrl(_)) => StatusCode::BAD_REQUEST,
            Self::Classify(_) => StatusCode::BAD_GATEWAY,
            Self::DuplicateRequest(_) => StatusCode::CONFLICT,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            Self::Pipeline(error) => ErrorBody {
                error: error.user_message(),
                code: error.code().to_string(),
            },
            Self::Classify(error) => ErrorBody {
                error: error.to_string(),
                code: "classify_error".to_string(),
            },
            Self::DuplicateRequest(id) => ErrorBody {
                error: format!("A request with id {} is already running", id),
                code: "duplicate_request".to_string(),
            },
        }
    }
}

fn pipeline_status(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PipelineError::LiveStreamUnsupported { .. } | PipelineError::NoSuitableFormat { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PipelineError::Unavailable { .. }
        | PipelineError::Stream { .. }
        | PipelineError::NothingSucceeded { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::Transcode { .. } | PipelineError::Io { .. } | PipelineError::Archive(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        PipelineError::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::Pipeline(PipelineError::Cancelled) => {
                tracing::debug!("Request cancelled by client")
            }
            Self::Pipeline(error) if status.is_server_error() => match error.diagnostics() {
                Some(diagnostics) => {
                    tracing::error!(diagnostics = %diagnostics, "Request failed: {}", error)
                }
                None => tracing::error!("Request failed: {}", error),
            },
            other => tracing::info!("Request rejected ({}): {:?}", status, other),
        }

        (status, Json(self.body())).into_response()
    }
}
