//! Request orchestration: validation, workspace lifetime, per-item processing
//! and hand-off to the result streamer.

use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::archive::{self, FailedItem};
use crate::config::Config;
use crate::output::{self, FileResult, StreamedResult};
use crate::resolver::{FallbackResolver, MediaReference, MediaResolver};
use crate::transcode::{FfmpegTranscoder, Transcoder};
use crate::utils::validate_and_normalize_url;

pub mod batch;
pub mod cancel;
pub mod error;
pub mod item;
pub mod progress;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::BatchResult;
pub use cancel::CancellationToken;
pub use error::PipelineError;
pub use item::ProcessedItem;
pub use progress::{ProgressEvent, ProgressReporter};
pub use workspace::TempWorkspace;

use cancel::ensure_active;

/// Title used when neither the caller nor the host names a single download
const DEFAULT_AUDIO_TITLE: &str = "audio";

/// Title used for an unnamed playlist archive
const DEFAULT_PLAYLIST_TITLE: &str = "playlist";

/// Body of a single-video request
#[derive(Debug, Clone, Deserialize)]
pub struct SingleRequest {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Body of a playlist request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistRequest {
    pub items: Vec<MediaReference>,
    #[serde(default)]
    pub playlist_title: Option<String>,
}

/// A streamed playlist archive plus the per-item outcome
#[derive(Debug)]
pub struct PlaylistDownload {
    pub result: StreamedResult,
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedItem>,
}

/// Knobs the pipeline reads on every request
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Parent of all request workspaces
    pub temp_root: PathBuf,

    /// Grace period before a released workspace is deleted
    pub cleanup_delay: Duration,

    /// Largest accepted playlist
    pub max_playlist_items: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir().join("tubetape"),
            cleanup_delay: Duration::from_secs(1),
            max_playlist_items: 200,
        }
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            temp_root: config.temp_root(),
            cleanup_delay: Duration::from_millis(config.workspace.cleanup_delay_ms),
            max_playlist_items: config.playlist.max_items,
        }
    }
}

/// Turns download requests into streamed MP3 files or ZIP archives
pub struct Pipeline {
    resolver: Arc<dyn MediaResolver>,
    transcoder: Arc<dyn Transcoder>,
    settings: PipelineSettings,
    progress: ProgressReporter,
}

impl Pipeline {
    pub fn new(
        resolver: Arc<dyn MediaResolver>,
        transcoder: Arc<dyn Transcoder>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            resolver,
            transcoder,
            settings,
            progress: ProgressReporter::disabled(),
        }
    }

    /// yt-dlp/direct resolvers and FFmpeg, configured from `config`
    pub fn from_config(config: &Config) -> Self {
        let resolver = FallbackResolver::with_defaults(config.tools.yt_dlp_path.clone());
        let transcoder = FfmpegTranscoder::new(config.tools.ffmpeg_path.clone())
            .with_log_level(config.tools.ffmpeg_log_level.clone());

        Self::new(
            Arc::new(resolver),
            Arc::new(transcoder),
            PipelineSettings::from(config),
        )
    }

    /// Forward status updates to `progress`
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    async fn create_workspace(&self) -> Result<TempWorkspace, PipelineError> {
        TempWorkspace::create(&self.settings.temp_root, self.settings.cleanup_delay)
            .await
            .map_err(|e| PipelineError::io("request workspace", e))
    }

    /// Download one video and stream it back as an MP3
    pub async fn download_single(
        &self,
        request: SingleRequest,
        token: &CancellationToken,
    ) -> Result<StreamedResult, PipelineError> {
        let url = validate_and_normalize_url(&request.url)
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        ensure_active(token)?;

        let title = request.title.filter(|t| !t.trim().is_empty());
        let reference = MediaReference::new(url, title.clone().unwrap_or_default());

        let workspace = self.create_workspace().await?;
        let processed = self.process_item(&reference, &workspace, token).await?;

        let title = title
            .or(processed.resolved_title)
            .unwrap_or_else(|| DEFAULT_AUDIO_TITLE.to_string());

        output::stream(
            FileResult::Audio {
                path: processed.audio_path,
                title,
            },
            workspace,
            token,
        )
        .await
    }

    /// Download every playlist item and stream back one ZIP archive.
    ///
    /// Items that fail appear in the archive as text markers. The request
    /// itself only fails when it is cancelled or no item succeeded.
    pub async fn download_playlist(
        &self,
        request: PlaylistRequest,
        token: &CancellationToken,
    ) -> Result<PlaylistDownload, PipelineError> {
        let items = self.validate_items(request.items)?;
        ensure_active(token)?;

        let workspace = self.create_workspace().await?;
        let batch = self.process_batch(&items, &workspace, token).await;

        if batch.cancelled || token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if batch.succeeded.is_empty() {
            return Err(PipelineError::NothingSucceeded {
                failed: batch.failed.len(),
                first_reason: batch
                    .failed
                    .first()
                    .map(|f| f.reason.clone())
                    .unwrap_or_default(),
            });
        }

        let succeeded = batch.succeeded_names();
        let failed = batch.failed.clone();
        let BatchResult {
            succeeded: entries,
            failed: failures,
            ..
        } = batch;

        let bytes = tokio::task::spawn_blocking(move || archive::build(&entries, &failures))
            .await
            .map_err(|e| PipelineError::Archive(e.to_string()))?
            .map_err(|e| PipelineError::Archive(e.to_string()))?;

        let title = request
            .playlist_title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PLAYLIST_TITLE.to_string());

        let result = output::stream(FileResult::Archive { bytes, title }, workspace, token).await?;

        Ok(PlaylistDownload {
            result,
            succeeded,
            failed,
        })
    }

    /// Reject malformed playlists before any work starts
    fn validate_items(
        &self,
        items: Vec<MediaReference>,
    ) -> Result<Vec<MediaReference>, PipelineError> {
        if items.is_empty() {
            return Err(PipelineError::InvalidInput(
                "Playlist contains no items".to_string(),
            ));
        }
        if items.len() > self.settings.max_playlist_items {
            return Err(PipelineError::InvalidInput(format!(
                "Playlist has {} items; at most {} are allowed",
                items.len(),
                self.settings.max_playlist_items
            )));
        }

        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let url = validate_and_normalize_url(&item.url).map_err(|e| {
                    PipelineError::InvalidInput(format!(
                        "Item {} (\"{}\"): {}",
                        index + 1,
                        item.title,
                        e
                    ))
                })?;
                Ok(MediaReference::new(url, item.title))
            })
            .collect()
    }
}
