use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;
use url::Url;

use super::{open_http_stream, FormatDescriptor, MediaInfo, MediaResolver, OpenedStream, ResolveError};

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "wav", "flac", "ogg", "aac", "opus"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "m4v"];

/// Direct URL resolver for audio and video files
pub struct DirectResolver {
    client: Client,
}

impl DirectResolver {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Extension of the last path segment, lowercased
    fn url_extension(url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let filename = parsed.path_segments()?.last()?.to_string();
        Path::new(&filename)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
    }

    /// Determine container from URL or content type
    fn determine_container(url: &str, content_type: Option<&str>) -> Option<String> {
        if let Some(ext) = Self::url_extension(url) {
            if AUDIO_EXTENSIONS.contains(&ext.as_str()) || VIDEO_EXTENSIONS.contains(&ext.as_str()) {
                return Some(ext);
            }
        }

        let container = match content_type? {
            ct if ct.contains("mpeg") => "mp3",
            ct if ct.contains("mp4") || ct.contains("m4a") => "mp4",
            ct if ct.contains("wav") => "wav",
            ct if ct.contains("flac") => "flac",
            ct if ct.contains("ogg") => "ogg",
            ct if ct.contains("webm") => "webm",
            ct if ct.contains("matroska") => "mkv",
            _ => return None,
        };
        Some(container.to_string())
    }

    /// Get content information via HEAD request
    async fn get_content_info(&self, url: &str) -> Result<(Option<String>, Option<u64>), ResolveError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| ResolveError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ResolveError::Unavailable(format!(
                "HTTP {} for {}",
                response.status(),
                url
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|ct| ct.to_str().ok())
            .map(|s| s.to_string());

        let content_length = response
            .headers()
            .get("content-length")
            .and_then(|cl| cl.to_str().ok())
            .and_then(|cl| cl.parse::<u64>().ok());

        Ok((content_type, content_length))
    }

    /// Human title from the file name, with URL encoding and separators removed
    fn title_from_url(parsed: &Url) -> Option<String> {
        parsed
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|filename| !filename.is_empty())
            .map(|filename| {
                let name = match filename.rfind('.') {
                    Some(dot_pos) => &filename[..dot_pos],
                    None => filename,
                };
                urlencoding::decode(name)
                    .unwrap_or_else(|_| name.into())
                    .replace(['_', '-'], " ")
            })
    }
}

#[async_trait]
impl MediaResolver for DirectResolver {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn supports_url(&self, url: &str) -> bool {
        Self::url_extension(url).map_or(false, |ext| {
            AUDIO_EXTENSIONS.contains(&ext.as_str()) || VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
    }

    async fn resolve(&self, url: &str) -> Result<MediaInfo, ResolveError> {
        let parsed = Url::parse(url).map_err(|_| ResolveError::InvalidUrl(url.to_string()))?;

        let (content_type, filesize) = self.get_content_info(url).await?;

        let Some(container) = Self::determine_container(url, content_type.as_deref()) else {
            // Not media at all: nothing to offer, the pipeline reports no suitable format.
            return Ok(MediaInfo {
                title: Self::title_from_url(&parsed),
                ..Default::default()
            });
        };

        let has_video = VIDEO_EXTENSIONS.contains(&container.as_str());

        Ok(MediaInfo {
            title: Self::title_from_url(&parsed),
            is_live: false,
            duration_secs: None,
            formats: vec![FormatDescriptor {
                format_id: "direct".to_string(),
                url: url.to_string(),
                container,
                has_audio: true,
                has_video,
                height: None,
                bitrate_kbps: None,
                filesize,
                http_headers: Default::default(),
                resolver: self.name().to_string(),
            }],
        })
    }

    async fn open(
        &self,
        _url: &str,
        format: &FormatDescriptor,
    ) -> Result<OpenedStream, ResolveError> {
        open_http_stream(&self.client, format).await
    }
}

impl Default for DirectResolver {
    fn default() -> Self {
        Self::new()
    }
}
