//! Media resolution: turning a URL into downloadable formats and byte streams.
//!
//! The video host itself is a black box reached through [`MediaResolver`].
//! Several resolvers can be composed behind a [`FallbackResolver`], which tries
//! them in a fixed order instead of nesting retries at the call site.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use url::Url;

pub mod direct;
pub mod youtube;

/// Sequential chunks of a remote or local byte source
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Container preferred for combined audio+video downloads
pub const PREFERRED_CONTAINER: &str = "mp4";

/// One piece of remote content to process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    pub url: String,
    pub title: String,
}

impl MediaReference {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// One encoded rendition offered by the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    /// Host-specific format identifier
    pub format_id: String,

    /// Direct URL of the rendition
    pub url: String,

    /// Container / file extension (mp4, webm, m4a, ...)
    pub container: String,

    pub has_audio: bool,
    pub has_video: bool,

    /// Vertical resolution for video renditions
    pub height: Option<u32>,

    /// Total bitrate in kbps if known
    pub bitrate_kbps: Option<f64>,

    /// Exact or approximate size in bytes
    pub filesize: Option<u64>,

    /// Headers the host requires when fetching `url`
    #[serde(default)]
    pub http_headers: HashMap<String, String>,

    /// Name of the resolver that produced this format
    pub resolver: String,
}

impl FormatDescriptor {
    fn is_muxed(&self) -> bool {
        self.has_audio && self.has_video
    }

    fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    fn quality_key(&self) -> (u32, f64) {
        (self.height.unwrap_or(0), self.bitrate_kbps.unwrap_or(0.0))
    }
}

/// Everything a resolver reports about one URL
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub is_live: bool,
    pub duration_secs: Option<f64>,
    pub formats: Vec<FormatDescriptor>,
}

/// A resolved reference with the format that will be downloaded
#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    pub title: Option<String>,
    pub is_live: bool,
    pub duration_secs: Option<f64>,
    pub chosen_format: FormatDescriptor,
}

impl MediaInfo {
    /// Pick the download format, or `None` when nothing usable is offered
    pub fn resolve_format(self) -> Option<ResolvedMedia> {
        let chosen_format = choose_format(&self.formats)?.clone();
        Some(ResolvedMedia {
            title: self.title,
            is_live: self.is_live,
            duration_secs: self.duration_secs,
            chosen_format,
        })
    }
}

/// Choose the best format to feed the transcoder.
///
/// Preference order: combined audio+video in [`PREFERRED_CONTAINER`], then any
/// combined audio+video, then an audio-only rendition. Within a tier the
/// highest resolution, then highest bitrate, wins.
pub fn choose_format(formats: &[FormatDescriptor]) -> Option<&FormatDescriptor> {
    let best = |predicate: &dyn Fn(&FormatDescriptor) -> bool| {
        formats.iter().filter(|f| predicate(f)).max_by(|a, b| {
            let (ha, ba) = a.quality_key();
            let (hb, bb) = b.quality_key();
            ha.cmp(&hb).then(ba.total_cmp(&bb))
        })
    };

    best(&|f| f.is_muxed() && f.container.eq_ignore_ascii_case(PREFERRED_CONTAINER))
        .or_else(|| best(&|f| f.is_muxed()))
        .or_else(|| best(&|f| f.is_audio_only()))
}

/// An opened byte stream for one format
pub struct OpenedStream {
    /// Total length if the host announced it
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

/// Resolver failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Media unavailable: {0}")]
    Unavailable(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("No resolver supports URL: {0}")]
    Unsupported(String),
}

/// Trait for resolving media on a remote host
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Name recorded in every [`FormatDescriptor`] this resolver produces
    fn name(&self) -> &'static str;

    /// Check if this resolver claims the given URL
    fn supports_url(&self, url: &str) -> bool;

    /// Report liveness and available formats for a URL
    async fn resolve(&self, url: &str) -> Result<MediaInfo, ResolveError>;

    /// Open the byte stream of a previously resolved format
    async fn open(&self, url: &str, format: &FormatDescriptor)
        -> Result<OpenedStream, ResolveError>;
}

/// Kind of content behind a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Single,
    Playlist,
    /// A video URL that also carries a playlist
    Mixed,
    Unknown,
}

/// Output of the classification oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub kind: ContentKind,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub items: Vec<MediaReference>,
    pub is_live: bool,
}

/// Trait for the URL classification oracle
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, url: &str) -> Result<Classification, ResolveError>;
}

/// Fetch a format over plain HTTP, forwarding the headers the host asked for
pub async fn open_http_stream(
    client: &Client,
    format: &FormatDescriptor,
) -> Result<OpenedStream, ResolveError> {
    let mut request = client.get(&format.url);
    for (name, value) in &format.http_headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request
        .send()
        .await
        .map_err(|e| ResolveError::Stream(e.to_string()))?;

    if !response.status().is_success() {
        return Err(ResolveError::Stream(format!(
            "HTTP {} while fetching format {}",
            response.status(),
            format.format_id
        )));
    }

    let content_length = response.content_length();
    let stream = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));

    Ok(OpenedStream {
        content_length,
        stream: Box::pin(stream),
    })
}

/// Ordered fallback over several resolvers.
///
/// `resolve` asks each resolver that claims the URL in registration order and
/// returns the first success. Invalid URLs are not retried elsewhere. `open` is
/// routed back to the resolver named in the format.
pub struct FallbackResolver {
    resolvers: Vec<Arc<dyn MediaResolver>>,
}

impl FallbackResolver {
    /// Create an empty fallback chain
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }

    /// yt-dlp first, direct media URLs second
    pub fn with_defaults(yt_dlp_path: PathBuf) -> Self {
        let mut chain = Self::new();
        chain.register(Arc::new(youtube::YtDlpResolver::new(yt_dlp_path)));
        chain.register(Arc::new(direct::DirectResolver::new()));
        chain
    }

    /// Append a resolver to the end of the chain
    pub fn register(&mut self, resolver: Arc<dyn MediaResolver>) {
        self.resolvers.push(resolver);
    }

    /// Names of all registered resolvers, in order
    pub fn list_resolvers(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }
}

impl Default for FallbackResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaResolver for FallbackResolver {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn supports_url(&self, url: &str) -> bool {
        self.resolvers.iter().any(|r| r.supports_url(url))
    }

    async fn resolve(&self, url: &str) -> Result<MediaInfo, ResolveError> {
        let mut last_error = None;

        for resolver in self.resolvers.iter().filter(|r| r.supports_url(url)) {
            match resolver.resolve(url).await {
                Ok(info) => return Ok(info),
                Err(e @ ResolveError::InvalidUrl(_)) => return Err(e),
                Err(e) => {
                    tracing::debug!("Resolver {} failed for {}: {}", resolver.name(), url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ResolveError::Unsupported(url.to_string())))
    }

    async fn open(
        &self,
        url: &str,
        format: &FormatDescriptor,
    ) -> Result<OpenedStream, ResolveError> {
        let resolver = self
            .resolvers
            .iter()
            .find(|r| r.name() == format.resolver)
            .ok_or_else(|| ResolveError::Unsupported(url.to_string()))?;

        resolver.open(url, format).await
    }
}

/// True when a URL names a video and a playlist at the same time
pub fn is_mixed_url(url: &str) -> bool {
    let (has_video, has_list) = video_and_list_params(url);
    has_video && has_list
}

/// True when a URL carries a playlist id, with or without a video id
pub fn has_playlist_param(url: &str) -> bool {
    video_and_list_params(url).1
}

fn video_and_list_params(url: &str) -> (bool, bool) {
    let Ok(parsed) = Url::parse(url) else {
        return (false, false);
    };
    let mut has_video = false;
    let mut has_list = false;
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "v" if !value.is_empty() => has_video = true,
            "list" if !value.is_empty() => has_list = true,
            _ => {}
        }
    }
    (has_video, has_list)
}
