//! Resolve, download and transcode a single media reference.

use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::cancel::{ensure_active, run_cancellable, CancellationToken};
use super::error::display_title;
use super::workspace::{remove_file_best_effort, TempWorkspace};
use super::{Pipeline, PipelineError};
use crate::resolver::{MediaReference, OpenedStream, ResolvedMedia};
use crate::transcode::{TranscodeJob, TranscodeRequest, TARGET_EXTENSION};

/// Emit a download progress event every this many bytes
const PROGRESS_STEP_BYTES: u64 = 256 * 1024;

/// A finished audio file inside the request workspace
#[derive(Debug, Clone)]
pub struct ProcessedItem {
    pub audio_path: PathBuf,

    /// Title reported by the host, if any
    pub resolved_title: Option<String>,
}

impl Pipeline {
    /// Turn one reference into an MP3 inside `workspace`.
    ///
    /// Live content is rejected before any byte is downloaded. Every
    /// intermediate file is removed again on failure or cancellation.
    pub async fn process_item(
        &self,
        reference: &MediaReference,
        workspace: &TempWorkspace,
        token: &CancellationToken,
    ) -> Result<ProcessedItem, PipelineError> {
        ensure_active(token)?;
        let label = display_title(reference);

        tracing::info!("Resolving \"{}\"", label);
        let info = run_cancellable(token, self.resolver.resolve(&reference.url))
            .await?
            .map_err(|e| PipelineError::from_resolve(e, reference))?;

        if info.is_live {
            tracing::info!("Skipping live content \"{}\"", label);
            return Err(PipelineError::LiveStreamUnsupported { title: label });
        }

        let resolved = info
            .resolve_format()
            .ok_or_else(|| PipelineError::NoSuitableFormat {
                title: label.clone(),
            })?;
        tracing::debug!(
            "Chose format {} ({}) from {} for \"{}\"",
            resolved.chosen_format.format_id,
            resolved.chosen_format.container,
            resolved.chosen_format.resolver,
            label
        );

        let source = self.download(reference, &resolved, workspace, token).await?;

        let mut job = TranscodeJob::new(TranscodeRequest {
            source,
            dest: workspace.file_path("audio", TARGET_EXTENSION),
            label: label.clone(),
            duration_secs: resolved.duration_secs,
            progress: self.progress.clone(),
        });
        let audio_path = job
            .run(self.transcoder.as_ref(), token)
            .await
            .map_err(|e| PipelineError::from_transcode(e, reference))?;

        tracing::info!("Converted \"{}\"", label);
        Ok(ProcessedItem {
            audio_path,
            resolved_title: resolved.title,
        })
    }

    /// Stream the chosen format into the workspace
    async fn download(
        &self,
        reference: &MediaReference,
        resolved: &ResolvedMedia,
        workspace: &TempWorkspace,
        token: &CancellationToken,
    ) -> Result<PathBuf, PipelineError> {
        let format = &resolved.chosen_format;
        let opened = run_cancellable(token, self.resolver.open(&reference.url, format))
            .await?
            .map_err(|e| PipelineError::from_resolve(e, reference))?;

        let path = workspace.file_path("source", &format.container);
        let total = opened.content_length.or(format.filesize);

        match self.write_stream(reference, opened, total, &path, token).await {
            Ok(bytes) => {
                tracing::debug!("Downloaded {} bytes to {}", bytes, path.display());
                Ok(path)
            }
            Err(e) => {
                remove_file_best_effort(&path).await;
                Err(e)
            }
        }
    }

    async fn write_stream(
        &self,
        reference: &MediaReference,
        opened: OpenedStream,
        total: Option<u64>,
        path: &Path,
        token: &CancellationToken,
    ) -> Result<u64, PipelineError> {
        let label = display_title(reference);
        let stream_error = |reason: String| PipelineError::Stream {
            title: label.clone(),
            url: reference.url.clone(),
            reason,
        };

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| PipelineError::io(label.clone(), e))?;
        let mut stream = opened.stream;
        let mut written = 0u64;
        let mut next_report = 0u64;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(PipelineError::Cancelled),
                chunk = stream.next() => chunk,
            };

            match chunk {
                None => break,
                Some(Err(e)) => return Err(stream_error(e.to_string())),
                Some(Ok(bytes)) => {
                    file.write_all(&bytes)
                        .await
                        .map_err(|e| PipelineError::io(label.clone(), e))?;
                    written += bytes.len() as u64;
                    if written >= next_report {
                        self.progress.downloading(&label, written, total);
                        next_report = written + PROGRESS_STEP_BYTES;
                    }
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| PipelineError::io(label.clone(), e))?;

        if written == 0 {
            return Err(stream_error("host returned an empty stream".to_string()));
        }
        self.progress.downloading(&label, written, total);
        Ok(written)
    }
}
