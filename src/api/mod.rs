//! HTTP front end
//!
//! # Routes
//!
//! - `POST /api/download` - One video as an MP3 attachment
//! - `POST /api/playlist` - Several videos as a ZIP attachment
//! - `POST /api/classify` - Single video, playlist or mixed URL
//! - `POST /api/cancel/:id` - Cancel a request started with `requestId`
//! - `GET /api/health` - Health check

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::pipeline::{Pipeline, TempWorkspace};
use crate::resolver::Classifier;

pub mod error_response;
pub mod routes;
pub mod state;

pub use error_response::{ApiError, ErrorBody};
pub use state::{AppState, CancelRegistry};

/// Workspaces older than this are considered abandoned at startup
const STALE_WORKSPACE_AGE: Duration = Duration::from_secs(60 * 60);

/// Create the API router with all route definitions
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/download", post(routes::download))
        .route("/api/playlist", post(routes::playlist))
        .route("/api/classify", post(routes::classify))
        .route("/api/cancel/:id", post(routes::cancel))
        .route("/api/health", get(routes::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the API on `addr` until Ctrl-C
pub async fn serve(
    addr: SocketAddr,
    pipeline: Arc<Pipeline>,
    classifier: Arc<dyn Classifier>,
) -> Result<()> {
    TempWorkspace::sweep_stale(&pipeline.settings().temp_root, STALE_WORKSPACE_AGE).await;

    let router = create_router(AppState::new(pipeline, classifier));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::routes::{HealthResponse, ITEMS_FAILED_HEADER, ITEMS_SUCCEEDED_HEADER};
    use super::*;
    use crate::pipeline::testing::{wait_until_empty, FakeMode, FakeOutcome, FakeResolver, FakeTranscoder};
    use crate::pipeline::PipelineSettings;
    use crate::resolver::{Classification, ContentKind, MediaReference, ResolveError};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::json;
    use std::io::{Cursor, Read};
    use tempfile::TempDir;
    use tower::ServiceExt; // for oneshot

    struct StaticClassifier;

    #[async_trait]
    impl Classifier for StaticClassifier {
        async fn classify(&self, url: &str) -> Result<Classification, ResolveError> {
            Ok(Classification {
                kind: ContentKind::Playlist,
                title: Some("Mix".to_string()),
                thumbnail: None,
                items: vec![MediaReference::new(url, "Track 1")],
                is_live: false,
            })
        }
    }

    fn app(root: &TempDir, resolver: FakeResolver, mode: FakeMode) -> (Router, AppState) {
        let pipeline = Pipeline::new(
            Arc::new(resolver),
            Arc::new(FakeTranscoder::new(mode)),
            PipelineSettings {
                temp_root: root.path().join("work"),
                cleanup_delay: Duration::ZERO,
                max_playlist_items: 10,
            },
        );
        let state = AppState::new(Arc::new(pipeline), Arc::new(StaticClassifier));
        (create_router(state.clone()), state)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_download_returns_mp3_attachment() {
        let root = TempDir::new().unwrap();
        let resolver = FakeResolver::new().with("https://youtu.be/song", FakeOutcome::media(b"mp3 data"));
        let (app, _) = app(&root, resolver, FakeMode::Copy);

        let response = app
            .oneshot(post_json(
                "/api/download",
                json!({ "url": "https://youtu.be/song", "title": "Test Song" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.contains("filename=\"Test Song.mp3\""));
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "8");

        assert_eq!(body_bytes(response).await, b"mp3 data");
        assert!(wait_until_empty(&root.path().join("work")).await);
    }

    #[tokio::test]
    async fn test_playlist_returns_zip_with_counts() {
        let root = TempDir::new().unwrap();
        let resolver = FakeResolver::new()
            .with("https://youtu.be/a", FakeOutcome::media(b"aa"))
            .with("https://youtu.be/b", FakeOutcome::media(b"bb"));
        let (app, _) = app(&root, resolver, FakeMode::Copy);

        let response = app
            .oneshot(post_json(
                "/api/playlist",
                json!({
                    "items": [
                        { "url": "https://youtu.be/a", "title": "A" },
                        { "url": "https://youtu.be/b", "title": "B" }
                    ],
                    "playlistTitle": "Road Trip"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        assert_eq!(response.headers()[ITEMS_SUCCEEDED_HEADER], "2");
        assert_eq!(response.headers()[ITEMS_FAILED_HEADER], "0");
        assert!(response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("Road Trip.zip"));

        let mut archive = zip::ZipArchive::new(Cursor::new(body_bytes(response).await)).unwrap();
        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        archive
            .by_name("B.mp3")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "bb");
        assert!(archive.by_name("A.mp3").is_ok());
    }

    #[tokio::test]
    async fn test_live_video_is_rejected() {
        let root = TempDir::new().unwrap();
        let resolver = FakeResolver::new().with("https://youtu.be/live", FakeOutcome::Live);
        let (app, _) = app(&root, resolver, FakeMode::Copy);

        let response = app
            .oneshot(post_json(
                "/api/download",
                json!({ "url": "https://youtu.be/live", "title": "Concert" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: ErrorBody = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body.code, "live_stream_unsupported");
        assert!(body.error.contains("Concert"));
    }

    #[tokio::test]
    async fn test_invalid_url_is_bad_request() {
        let root = TempDir::new().unwrap();
        let (app, _) = app(&root, FakeResolver::new(), FakeMode::Copy);

        let response = app
            .oneshot(post_json("/api/download", json!({ "url": "ftp://example.com/a" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_body_gets_json_error() {
        let root = TempDir::new().unwrap();
        let (app, _) = app(&root, FakeResolver::new(), FakeMode::Copy);

        let malformed = Request::builder()
            .method("POST")
            .uri("/api/download")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.clone().oneshot(malformed).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let body: ErrorBody = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body.code, "invalid_input");
        assert!(!body.error.is_empty());

        let response = app
            .oneshot(post_json("/api/playlist", json!({ "items": "not a list" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body.code, "invalid_input");
        assert!(!root.path().join("work").exists());
    }

    #[tokio::test]
    async fn test_cancel_in_flight_request() {
        let root = TempDir::new().unwrap();
        let resolver = FakeResolver::new().with("https://youtu.be/song", FakeOutcome::media(b"x"));
        let (app, state) = app(&root, resolver, FakeMode::WaitForCancel);

        let pending = tokio::spawn(app.clone().oneshot(post_json(
            "/api/download",
            json!({ "url": "https://youtu.be/song", "title": "Slow", "requestId": "req-42" }),
        )));

        for _ in 0..200 {
            if !state.requests.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let cancel = Request::builder()
            .method("POST")
            .uri("/api/cancel/req-42")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(cancel).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = pending.await.unwrap().unwrap();
        assert_eq!(response.status().as_u16(), 499);
        assert!(state.requests.is_empty());
        assert!(wait_until_empty(&root.path().join("work")).await);

        let again = Request::builder()
            .method("POST")
            .uri("/api/cancel/req-42")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(again).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_classify_and_health() {
        let root = TempDir::new().unwrap();
        let (app, _) = app(&root, FakeResolver::new(), FakeMode::Copy);

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/classify",
                json!({ "url": "https://www.youtube.com/playlist?list=PL1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let classification: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(classification["kind"], "playlist");
        assert_eq!(classification["items"][0]["title"], "Track 1");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let health: HealthResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.in_flight, 0);
    }
}
