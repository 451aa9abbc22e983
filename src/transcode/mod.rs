//! Audio extraction through an external transcoder process.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::pipeline::progress::ProgressReporter;
use crate::pipeline::workspace::remove_file_best_effort;

pub mod ffmpeg;

pub use ffmpeg::FfmpegTranscoder;

/// Fixed output codec: MPEG-1 Layer III
pub const TARGET_EXTENSION: &str = "mp3";

/// Fixed output bitrate
pub const TARGET_BITRATE_KBPS: u32 = 192;

/// Errors that can occur while transcoding
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Transcoder not found at path: {path}")]
    NotFound { path: PathBuf },

    #[error("Source file not found: {path}")]
    SourceMissing { path: PathBuf },

    /// The process failed; `diagnostics` carries its stderr for logging only
    #[error("Transcoding failed: {reason}")]
    Failed {
        reason: String,
        diagnostics: Option<String>,
    },

    #[error("Transcoding cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    pub fn failed(reason: impl Into<String>, diagnostics: Option<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            diagnostics,
        }
    }

    /// Process diagnostic output, if any was captured
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::Failed { diagnostics, .. } => diagnostics.as_deref(),
            _ => None,
        }
    }
}

/// Everything a transcoder needs for one file
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub source: PathBuf,
    pub dest: PathBuf,

    /// Item title, for logs and progress
    pub label: String,

    /// Source duration, used to turn position into a percentage
    pub duration_secs: Option<f64>,

    pub progress: ProgressReporter,
}

/// Trait for converting downloaded media into the target audio format
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Write `request.dest` from `request.source`.
    ///
    /// Must terminate the underlying work and return
    /// [`TranscodeError::Cancelled`] once `token` is cancelled.
    async fn transcode(
        &self,
        request: &TranscodeRequest,
        token: &CancellationToken,
    ) -> Result<(), TranscodeError>;
}

/// Lifecycle of one transcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// One source file on its way to becoming an audio file.
///
/// Running the job always deletes the source afterwards; on failure or
/// cancellation the destination is deleted too, so a partial output can never
/// be mistaken for a result.
#[derive(Debug)]
pub struct TranscodeJob {
    request: TranscodeRequest,
    state: TranscodeState,
}

impl TranscodeJob {
    pub fn new(request: TranscodeRequest) -> Self {
        Self {
            request,
            state: TranscodeState::Pending,
        }
    }

    pub fn state(&self) -> TranscodeState {
        self.state
    }

    pub fn source_path(&self) -> &Path {
        &self.request.source
    }

    pub fn dest_path(&self) -> &Path {
        &self.request.dest
    }

    /// Run the job once and return the path of the finished audio file
    pub async fn run(
        &mut self,
        transcoder: &dyn Transcoder,
        token: &CancellationToken,
    ) -> Result<PathBuf, TranscodeError> {
        if self.state != TranscodeState::Pending {
            return Err(TranscodeError::failed(
                format!("transcode job already {:?}", self.state),
                None,
            ));
        }

        if token.is_cancelled() {
            self.state = TranscodeState::Cancelled;
            remove_file_best_effort(&self.request.source).await;
            return Err(TranscodeError::Cancelled);
        }

        self.state = TranscodeState::Running;
        tracing::debug!(
            "Transcoding {} with {} -> {}",
            self.request.label,
            transcoder.name(),
            self.request.dest.display()
        );

        let result = transcoder.transcode(&self.request, token).await;
        remove_file_best_effort(&self.request.source).await;

        let result = match result {
            Ok(()) => self.verify_output().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.state = TranscodeState::Succeeded;
                Ok(self.request.dest.clone())
            }
            Err(e) => {
                self.state = match e {
                    TranscodeError::Cancelled => TranscodeState::Cancelled,
                    _ => TranscodeState::Failed,
                };
                remove_file_best_effort(&self.request.dest).await;
                Err(e)
            }
        }
    }

    async fn verify_output(&self) -> Result<(), TranscodeError> {
        match tokio::fs::metadata(&self.request.dest).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            Ok(_) => Err(TranscodeError::failed("transcoder produced an empty file", None)),
            Err(_) => Err(TranscodeError::failed("transcoder produced no output file", None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(dir: &TempDir) -> TranscodeRequest {
        TranscodeRequest {
            source: dir.path().join("source.mp4"),
            dest: dir.path().join("out.mp3"),
            label: "Test Song".to_string(),
            duration_secs: Some(10.0),
            progress: ProgressReporter::disabled(),
        }
    }

    #[tokio::test]
    async fn test_job_succeeds_and_removes_source() {
        let dir = TempDir::new().unwrap();
        let request = request(&dir);
        tokio::fs::write(&request.source, b"video").await.unwrap();

        let mut transcoder = MockTranscoder::new();
        transcoder.expect_name().return_const("mock");
        transcoder
            .expect_transcode()
            .times(1)
            .returning(|request, _| {
                std::fs::write(&request.dest, b"audio").unwrap();
                Ok(())
            });

        let mut job = TranscodeJob::new(request.clone());
        assert_eq!(job.state(), TranscodeState::Pending);

        let out = job.run(&transcoder, &CancellationToken::new()).await.unwrap();
        assert_eq!(out, request.dest);
        assert_eq!(job.state(), TranscodeState::Succeeded);
        assert!(!job.source_path().exists());
        assert!(job.dest_path().exists());

        // A job runs at most once.
        assert!(job.run(&transcoder, &CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_job_leaves_no_partial_output() {
        let dir = TempDir::new().unwrap();
        let request = request(&dir);
        tokio::fs::write(&request.source, b"video").await.unwrap();

        let mut transcoder = MockTranscoder::new();
        transcoder.expect_name().return_const("mock");
        transcoder.expect_transcode().returning(|request, _| {
            std::fs::write(&request.dest, b"half").unwrap();
            Err(TranscodeError::failed("exit 1", Some("Invalid data found".into())))
        });

        let mut job = TranscodeJob::new(request);
        let err = job.run(&transcoder, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.diagnostics(), Some("Invalid data found"));
        assert_eq!(job.state(), TranscodeState::Failed);
        assert!(!job.source_path().exists());
        assert!(!job.dest_path().exists());
    }

    #[tokio::test]
    async fn test_success_without_output_is_failure() {
        let dir = TempDir::new().unwrap();
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_name().return_const("mock");
        transcoder.expect_transcode().returning(|_, _| Ok(()));

        let mut job = TranscodeJob::new(request(&dir));
        let err = job.run(&transcoder, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TranscodeError::Failed { .. }));
        assert_eq!(job.state(), TranscodeState::Failed);
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_transcoder() {
        let dir = TempDir::new().unwrap();
        let request = request(&dir);
        tokio::fs::write(&request.source, b"video").await.unwrap();

        let mut transcoder = MockTranscoder::new();
        transcoder.expect_transcode().never();

        let token = CancellationToken::new();
        token.cancel();

        let mut job = TranscodeJob::new(request);
        let err = job.run(&transcoder, &token).await.unwrap_err();
        assert!(matches!(err, TranscodeError::Cancelled));
        assert_eq!(job.state(), TranscodeState::Cancelled);
        assert!(!job.source_path().exists());
    }
}
