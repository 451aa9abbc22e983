//! Route handlers

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};

use super::error_response::ApiError;
use super::state::{AppState, RequestGuard};
use crate::output::StreamedResult;
use crate::pipeline::{PlaylistRequest, SingleRequest};
use crate::resolver::{ByteStream, Classification, MediaReference, ResolveError};
use crate::utils::validate_and_normalize_url;

pub const ITEMS_SUCCEEDED_HEADER: &str = "x-items-succeeded";
pub const ITEMS_FAILED_HEADER: &str = "x-items-failed";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadBody {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistBody {
    pub items: Vec<MediaReference>,
    #[serde(default)]
    pub playlist_title: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyBody {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub in_flight: usize,
    pub started_at: DateTime<Utc>,
}

fn register(state: &AppState, request_id: Option<String>) -> Result<RequestGuard, ApiError> {
    state
        .requests
        .register(request_id.clone())
        .ok_or_else(|| ApiError::DuplicateRequest(request_id.unwrap_or_default()))
}

/// `POST /api/download`: one video as an MP3 attachment
pub async fn download(
    State(state): State<AppState>,
    body: Result<Json<DownloadBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let guard = register(&state, body.request_id)?;
    tracing::info!("Download requested for {}", body.url);

    let result = state
        .pipeline
        .download_single(
            SingleRequest {
                url: body.url,
                title: body.title,
            },
            guard.token(),
        )
        .await?;

    Ok(attachment(result, guard, None))
}

/// `POST /api/playlist`: many videos as one ZIP attachment
pub async fn playlist(
    State(state): State<AppState>,
    body: Result<Json<PlaylistBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let guard = register(&state, body.request_id)?;
    tracing::info!("Playlist requested with {} item(s)", body.items.len());

    let download = state
        .pipeline
        .download_playlist(
            PlaylistRequest {
                items: body.items,
                playlist_title: body.playlist_title,
            },
            guard.token(),
        )
        .await?;

    let counts = (download.succeeded.len(), download.failed.len());
    Ok(attachment(download.result, guard, Some(counts)))
}

/// `POST /api/classify`: what kind of content a URL points at
pub async fn classify(
    State(state): State<AppState>,
    body: Result<Json<ClassifyBody>, JsonRejection>,
) -> Result<Json<Classification>, ApiError> {
    let Json(body) = body?;
    let url = validate_and_normalize_url(&body.url)
        .map_err(|e| ApiError::Classify(ResolveError::InvalidUrl(e.to_string())))?;

    let classification = state
        .classifier
        .classify(&url)
        .await
        .map_err(ApiError::Classify)?;
    Ok(Json(classification))
}

/// `POST /api/cancel/:id`
pub async fn cancel(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.requests.cancel(&id) {
        tracing::info!("Cancellation requested for {}", id);
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// `GET /api/health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        in_flight: state.requests.len(),
        started_at: state.started_at,
    })
}

/// Build a streaming attachment response that owns the request guard
fn attachment(result: StreamedResult, guard: RequestGuard, counts: Option<(usize, usize)>) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, result.mime_type)
        .header(header::CONTENT_DISPOSITION, result.content_disposition());

    if let Some(length) = result.length {
        builder = builder.header(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    if let Some((succeeded, failed)) = counts {
        builder = builder
            .header(ITEMS_SUCCEEDED_HEADER, HeaderValue::from(succeeded))
            .header(ITEMS_FAILED_HEADER, HeaderValue::from(failed));
    }

    let body = GuardedBody {
        inner: result.body,
        _guard: guard,
    };

    match builder.body(Body::from_stream(body)) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Failed to build response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Response body that keeps the request registered, and cancellable, until
/// it is fully sent or dropped
struct GuardedBody {
    inner: ByteStream,
    _guard: RequestGuard,
}

impl Stream for GuardedBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
