//! FFmpeg-based audio extraction.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{TranscodeError, TranscodeRequest, Transcoder, TARGET_BITRATE_KBPS};
use crate::pipeline::workspace::remove_file_best_effort;

/// Number of trailing stderr lines kept for diagnostics
const MAX_DIAGNOSTIC_LINES: usize = 40;

/// Strips the video track and encodes audio as 192 kbps MP3
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
    log_level: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            log_level: "error".to_string(),
        }
    }

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, ...)
    pub fn with_log_level(mut self, log_level: impl Into<String>) -> Self {
        self.log_level = log_level.into();
        self
    }

    /// Builds ffmpeg arguments for audio extraction
    fn build_args(&self, request: &TranscodeRequest) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-nostats".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            request.source.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-c:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            format!("{}k", TARGET_BITRATE_KBPS),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-progress".to_string(),
            "pipe:2".to_string(),
            request.dest.to_string_lossy().to_string(),
        ]
    }
}

/// Position in seconds from a `-progress` line
fn parse_out_time(line: &str) -> Option<f64> {
    // Despite the name, out_time_ms is reported in microseconds.
    let micros = line
        .strip_prefix("out_time_us=")
        .or_else(|| line.strip_prefix("out_time_ms="))?;
    micros.trim().parse::<f64>().ok().map(|us| us / 1_000_000.0)
}

/// `key=value` lines emitted by `-progress`
fn is_progress_line(line: &str) -> bool {
    match line.split_once('=') {
        Some((key, value)) => {
            !key.is_empty()
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !value.contains(' ')
        }
        None => false,
    }
}

fn percent_of(position_secs: f64, duration_secs: Option<f64>) -> Option<f32> {
    let duration = duration_secs.filter(|d| *d > 0.0)?;
    Some((position_secs / duration * 100.0).clamp(0.0, 100.0) as f32)
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn transcode(
        &self,
        request: &TranscodeRequest,
        token: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        if !request.source.exists() {
            return Err(TranscodeError::SourceMissing {
                path: request.source.clone(),
            });
        }

        let mut child = Command::new(&self.ffmpeg_path)
            .args(self.build_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscodeError::NotFound {
                        path: self.ffmpeg_path.clone(),
                    }
                } else {
                    TranscodeError::Io(e)
                }
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TranscodeError::failed("ffmpeg stderr was not captured", None))?;

        let progress = request.progress.clone();
        let label = request.label.clone();
        let duration_secs = request.duration_secs;

        // Drains stderr: progress lines become events, the rest is kept for diagnostics.
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut diagnostics = VecDeque::with_capacity(MAX_DIAGNOSTIC_LINES);
            let mut last_percent = -1.0f32;

            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(position) = parse_out_time(&line) {
                    if let Some(percent) = percent_of(position, duration_secs) {
                        if percent - last_percent >= 1.0 {
                            last_percent = percent;
                            progress.transcoding(&label, percent);
                        }
                    }
                    continue;
                }
                if line == "progress=end" {
                    progress.transcoding(&label, 100.0);
                    continue;
                }
                if is_progress_line(&line) || line.trim().is_empty() {
                    continue;
                }
                if diagnostics.len() == MAX_DIAGNOSTIC_LINES {
                    diagnostics.pop_front();
                }
                diagnostics.push_back(line);
            }

            diagnostics.into_iter().collect::<Vec<_>>().join("\n")
        });

        let status = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!("Stopping ffmpeg for {}", request.label);
                let _ = child.start_kill();
                let _ = child.wait().await;
                let _ = reader.await;
                remove_file_best_effort(&request.dest).await;
                return Err(TranscodeError::Cancelled);
            }
            status = child.wait() => status?,
        };

        let diagnostics = reader.await.unwrap_or_default();

        if !status.success() {
            remove_file_best_effort(&request.dest).await;
            return Err(TranscodeError::failed(
                format!("ffmpeg exited with {}", status),
                if diagnostics.is_empty() {
                    None
                } else {
                    Some(diagnostics)
                },
            ));
        }

        Ok(())
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new(PathBuf::from("ffmpeg"))
    }
}
