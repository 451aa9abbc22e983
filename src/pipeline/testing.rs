//! In-process stand-ins for the resolver and transcoder.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::resolver::{FormatDescriptor, MediaInfo, MediaResolver, OpenedStream, ResolveError};
use crate::transcode::{TranscodeError, TranscodeRequest, Transcoder};

#[derive(Debug, Clone)]
pub(crate) enum FakeOutcome {
    Media(Vec<u8>),
    Live,
    NoFormats,
    Unavailable,
    BrokenStream,
    /// Sends one chunk and then never finishes
    Stall,
}

impl FakeOutcome {
    pub(crate) fn media(payload: &[u8]) -> Self {
        Self::Media(payload.to_vec())
    }
}

/// Resolver answering from a fixed URL table
pub(crate) struct FakeResolver {
    outcomes: HashMap<String, FakeOutcome>,
    opened: Arc<AtomicUsize>,
}

impl FakeResolver {
    pub(crate) fn new() -> Self {
        Self {
            outcomes: HashMap::new(),
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with(mut self, url: &str, outcome: FakeOutcome) -> Self {
        self.outcomes.insert(url.to_string(), outcome);
        self
    }

    /// Shared count of `open` calls
    pub(crate) fn open_counter(&self) -> Arc<AtomicUsize> {
        self.opened.clone()
    }

    fn muxed_format(url: &str) -> FormatDescriptor {
        FormatDescriptor {
            format_id: "18".to_string(),
            url: url.to_string(),
            container: "mp4".to_string(),
            has_audio: true,
            has_video: true,
            height: Some(360),
            resolver: "fake".to_string(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl MediaResolver for FakeResolver {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn supports_url(&self, _url: &str) -> bool {
        true
    }

    async fn resolve(&self, url: &str) -> Result<MediaInfo, ResolveError> {
        let info = |is_live: bool, formats: Vec<FormatDescriptor>| MediaInfo {
            title: Some("Fake Title".to_string()),
            is_live,
            duration_secs: Some(1.0),
            formats,
        };

        match self.outcomes.get(url) {
            Some(FakeOutcome::Media(_))
            | Some(FakeOutcome::BrokenStream)
            | Some(FakeOutcome::Stall) => {
                Ok(info(false, vec![Self::muxed_format(url)]))
            }
            Some(FakeOutcome::Live) => Ok(info(true, vec![Self::muxed_format(url)])),
            Some(FakeOutcome::NoFormats) => Ok(info(
                false,
                vec![FormatDescriptor {
                    has_audio: false,
                    ..Self::muxed_format(url)
                }],
            )),
            Some(FakeOutcome::Unavailable) | None => {
                Err(ResolveError::Unavailable("Video unavailable".to_string()))
            }
        }
    }

    async fn open(
        &self,
        url: &str,
        _format: &FormatDescriptor,
    ) -> Result<OpenedStream, ResolveError> {
        self.opened.fetch_add(1, Ordering::SeqCst);

        if let Some(FakeOutcome::Stall) = self.outcomes.get(url) {
            let first = futures_util::stream::iter(vec![Ok(Bytes::from_static(b"first chunk"))]);
            return Ok(OpenedStream {
                content_length: Some(1024),
                stream: Box::pin(first.chain(futures_util::stream::pending())),
            });
        }

        let chunks: Vec<std::io::Result<Bytes>> = match self.outcomes.get(url) {
            Some(FakeOutcome::Media(payload)) => {
                let middle = payload.len() / 2;
                vec![
                    Ok(Bytes::copy_from_slice(&payload[..middle])),
                    Ok(Bytes::copy_from_slice(&payload[middle..])),
                ]
            }
            Some(FakeOutcome::BrokenStream) => vec![
                Ok(Bytes::from_static(b"partial")),
                Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                )),
            ],
            _ => return Err(ResolveError::Stream("nothing to open".to_string())),
        };

        Ok(OpenedStream {
            content_length: None,
            stream: Box::pin(futures_util::stream::iter(chunks)),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum FakeMode {
    /// Copy source to destination
    Copy,
    /// Leave a partial file and fail
    Fail,
    /// Block until cancelled
    WaitForCancel,
}

pub(crate) struct FakeTranscoder {
    mode: FakeMode,
    calls: AtomicUsize,
}

impl FakeTranscoder {
    pub(crate) fn new(mode: FakeMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn transcode(
        &self,
        request: &TranscodeRequest,
        token: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.mode {
            FakeMode::Copy => {
                tokio::fs::copy(&request.source, &request.dest).await?;
                Ok(())
            }
            FakeMode::Fail => {
                tokio::fs::write(&request.dest, b"half").await?;
                Err(TranscodeError::failed(
                    "ffmpeg exited with exit status: 1",
                    Some("Invalid data found when processing input".to_string()),
                ))
            }
            FakeMode::WaitForCancel => {
                tokio::fs::write(&request.dest, b"half").await?;
                token.cancelled().await;
                Err(TranscodeError::Cancelled)
            }
        }
    }
}

/// Poll until `dir` is missing or holds no entries
pub(crate) async fn wait_until_empty(dir: &Path) -> bool {
    for _ in 0..200 {
        match std::fs::read_dir(dir) {
            Err(_) => return true,
            Ok(mut entries) => {
                if entries.next().is_none() {
                    return true;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
