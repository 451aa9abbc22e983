//! Delivering a finished result to the caller and cleaning up behind it.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::pipeline::cancel::ensure_active;
use crate::pipeline::workspace::{remove_file_best_effort, TempWorkspace};
use crate::pipeline::PipelineError;
use crate::resolver::ByteStream;
use crate::utils::{format_file_size, sanitize_filename};

pub const AUDIO_MIME: &str = "audio/mpeg";
pub const ZIP_MIME: &str = "application/zip";

const READ_CHUNK_SIZE: usize = 64 * 1024;

pub mod console;

/// A finished request result, before it is streamed
#[derive(Debug)]
pub enum FileResult {
    /// A single MP3 inside the workspace
    Audio { path: PathBuf, title: String },
    /// A playlist archive held in memory
    Archive { bytes: Vec<u8>, title: String },
}

impl FileResult {
    pub fn filename(&self) -> String {
        match self {
            Self::Audio { title, .. } => format!("{}.mp3", sanitize_filename(title)),
            Self::Archive { title, .. } => format!("{}.zip", sanitize_filename(title)),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Audio { .. } => AUDIO_MIME,
            Self::Archive { .. } => ZIP_MIME,
        }
    }
}

/// Body plus the metadata needed to deliver it as an attachment.
///
/// The request workspace lives inside `body` and is released exactly once,
/// when the body ends, fails, is cancelled or is dropped.
pub struct StreamedResult {
    pub filename: String,
    pub mime_type: &'static str,
    pub length: Option<u64>,
    pub body: ByteStream,
}

impl std::fmt::Debug for StreamedResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamedResult")
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

impl StreamedResult {
    /// `Content-Disposition` value announcing the sanitized filename
    pub fn content_disposition(&self) -> String {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            self.filename,
            urlencoding::encode(&self.filename)
        )
    }

    /// Write the body to `path`, removing the partial file on failure
    pub async fn save_to_file(self, path: &Path) -> Result<u64, PipelineError> {
        let context = self.filename.clone();
        match write_body(self.body, path).await {
            Ok(written) => {
                tracing::info!("Saved {} ({})", path.display(), format_file_size(written));
                Ok(written)
            }
            Err(e) => {
                remove_file_best_effort(path).await;
                if e.kind() == io::ErrorKind::Interrupted {
                    Err(PipelineError::Cancelled)
                } else {
                    Err(PipelineError::io(context, e))
                }
            }
        }
    }

    /// Drain the body into memory
    pub async fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.length.unwrap_or(0) as usize);
        while let Some(chunk) = self.body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer)
    }
}

async fn write_body(mut body: ByteStream, path: &Path) -> io::Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Wrap a result into a byte stream that owns the workspace.
///
/// Fails with [`PipelineError::Cancelled`] if the token fired before
/// streaming started; the workspace is released in that case too.
pub async fn stream(
    result: FileResult,
    workspace: TempWorkspace,
    token: &CancellationToken,
) -> Result<StreamedResult, PipelineError> {
    ensure_active(token)?;

    let filename = result.filename();
    let mime_type = result.mime_type();

    let (length, inner): (u64, ByteStream) = match result {
        FileResult::Audio { path, title } => {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| PipelineError::io(title.clone(), e))?;
            let length = file
                .metadata()
                .await
                .map_err(|e| PipelineError::io(title, e))?
                .len();
            (
                length,
                Box::pin(ReaderStream::with_capacity(file, READ_CHUNK_SIZE)),
            )
        }
        FileResult::Archive { bytes, .. } => {
            let length = bytes.len() as u64;
            let chunk = Bytes::from(bytes);
            (
                length,
                Box::pin(futures_util::stream::once(async move { Ok(chunk) })),
            )
        }
    };

    tracing::debug!("Streaming {} ({})", filename, format_file_size(length));
    Ok(StreamedResult {
        filename,
        mime_type,
        length: Some(length),
        body: Box::pin(CleanupStream::new(inner, workspace, token.clone())),
    })
}

/// Byte stream that releases its workspace on the first terminal event
struct CleanupStream {
    inner: ByteStream,
    workspace: Option<TempWorkspace>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    finished: bool,
}

impl CleanupStream {
    fn new(inner: ByteStream, workspace: TempWorkspace, token: CancellationToken) -> Self {
        Self {
            inner,
            workspace: Some(workspace),
            cancelled: Box::pin(token.cancelled_owned()),
            finished: false,
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        // Close any open file before the directory goes away.
        self.inner = Box::pin(futures_util::stream::empty());
        drop(self.workspace.take());
    }
}

impl Stream for CleanupStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.finish();
            return Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "download cancelled",
            ))));
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::workspace::wait_until_removed;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn workspace_with_audio(root: &TempDir) -> (TempWorkspace, PathBuf) {
        let workspace = TempWorkspace::create(root.path(), Duration::ZERO).await.unwrap();
        let path = workspace.file_path("audio", "mp3");
        tokio::fs::write(&path, vec![7u8; 200_000]).await.unwrap();
        (workspace, path)
    }

    #[tokio::test]
    async fn test_audio_stream_releases_workspace_at_end() {
        let root = TempDir::new().unwrap();
        let (workspace, path) = workspace_with_audio(&root).await;
        let dir = workspace.path().to_path_buf();

        let result = FileResult::Audio {
            path,
            title: "Test Song".to_string(),
        };
        let streamed = stream(result, workspace, &CancellationToken::new()).await.unwrap();
        assert_eq!(streamed.filename, "Test Song.mp3");
        assert_eq!(streamed.mime_type, AUDIO_MIME);
        assert_eq!(streamed.length, Some(200_000));
        assert!(streamed
            .content_disposition()
            .starts_with("attachment; filename=\"Test Song.mp3\""));
        assert!(dir.exists());

        let bytes = streamed.into_bytes().await.unwrap();
        assert_eq!(bytes.len(), 200_000);
        assert!(wait_until_removed(&dir, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_interrupts_and_cleans_up() {
        let root = TempDir::new().unwrap();
        let (workspace, path) = workspace_with_audio(&root).await;
        let dir = workspace.path().to_path_buf();
        let token = CancellationToken::new();

        let result = FileResult::Audio {
            path,
            title: "Test Song".to_string(),
        };
        let mut streamed = stream(result, workspace, &token).await.unwrap();
        assert!(streamed.body.next().await.unwrap().is_ok());

        token.cancel();
        let err = streamed.body.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert!(streamed.body.next().await.is_none());
        assert!(wait_until_removed(&dir, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_dropped_stream_cleans_up() {
        let root = TempDir::new().unwrap();
        let (workspace, path) = workspace_with_audio(&root).await;
        let dir = workspace.path().to_path_buf();

        let result = FileResult::Audio {
            path,
            title: "x".to_string(),
        };
        let streamed = stream(result, workspace, &CancellationToken::new()).await.unwrap();
        drop(streamed);
        assert!(wait_until_removed(&dir, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_streams() {
        let root = TempDir::new().unwrap();
        let (workspace, path) = workspace_with_audio(&root).await;
        let dir = workspace.path().to_path_buf();
        let token = CancellationToken::new();
        token.cancel();

        let result = FileResult::Audio {
            path,
            title: "x".to_string(),
        };
        let err = stream(result, workspace, &token).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(wait_until_removed(&dir, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_archive_saved_to_file() {
        let root = TempDir::new().unwrap();
        let workspace = TempWorkspace::create(root.path(), Duration::ZERO).await.unwrap();
        let result = FileResult::Archive {
            bytes: b"PK-archive".to_vec(),
            title: "My Mix: vol/2".to_string(),
        };
        let streamed = stream(result, workspace, &CancellationToken::new()).await.unwrap();
        assert_eq!(streamed.filename, "My Mix_ vol_2.zip");
        assert_eq!(streamed.mime_type, ZIP_MIME);

        let dest = root.path().join("out.zip");
        let written = streamed.save_to_file(&dest).await.unwrap();
        assert_eq!(written, 10);
        assert_eq!(std::fs::read(&dest).unwrap(), b"PK-archive");
    }
}
