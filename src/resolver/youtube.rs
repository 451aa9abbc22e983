use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use super::{
    is_mixed_url, open_http_stream, Classification, Classifier, ContentKind, FormatDescriptor,
    MediaInfo, MediaReference, MediaResolver, OpenedStream, ResolveError,
};

/// Protocols that are plain single-request HTTP downloads
const DIRECT_PROTOCOLS: &[&str] = &["https", "http"];

/// YouTube resolver and classifier backed by yt-dlp
pub struct YtDlpResolver {
    yt_dlp_path: PathBuf,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct VideoDump {
    title: Option<String>,
    is_live: Option<bool>,
    live_status: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    formats: Vec<FormatDump>,
}

#[derive(Debug, Deserialize)]
struct FormatDump {
    format_id: String,
    url: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    tbr: Option<f64>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
    protocol: Option<String>,
    #[serde(default)]
    http_headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FlatListing {
    #[serde(rename = "_type")]
    kind: Option<String>,
    title: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<ThumbnailDump>,
    #[serde(default)]
    entries: Vec<Option<FlatEntry>>,
    is_live: Option<bool>,
    live_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThumbnailDump {
    url: String,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    url: Option<String>,
    title: Option<String>,
}

fn codec_present(codec: &Option<String>) -> bool {
    codec.as_deref().map_or(false, |c| !c.is_empty() && c != "none")
}

fn reports_live(is_live: Option<bool>, live_status: Option<&str>) -> bool {
    // Upcoming premieres cannot be downloaded either.
    is_live == Some(true) || matches!(live_status, Some("is_live" | "is_upcoming"))
}

impl YtDlpResolver {
    pub fn new(yt_dlp_path: PathBuf) -> Self {
        Self {
            yt_dlp_path,
            client: Client::new(),
        }
    }

    /// Run yt-dlp and return its stdout
    async fn run_json(&self, args: &[&str], url: &str) -> Result<Vec<u8>, ResolveError> {
        tracing::debug!("Running yt-dlp {:?} for: {}", args, url);

        let output = Command::new(&self.yt_dlp_path)
            .args(args)
            .arg("--no-warnings")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ResolveError::Unavailable(format!(
                    "failed to run yt-dlp at {}: {}",
                    self.yt_dlp_path.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        Ok(output.stdout)
    }

    fn media_info_from_dump(&self, dump: VideoDump) -> MediaInfo {
        let formats = dump
            .formats
            .into_iter()
            .filter(|f| {
                f.protocol
                    .as_deref()
                    .map_or(true, |p| DIRECT_PROTOCOLS.contains(&p))
            })
            .filter_map(|f| {
                let url = f.url?;
                Some(FormatDescriptor {
                    has_audio: codec_present(&f.acodec),
                    has_video: codec_present(&f.vcodec),
                    format_id: f.format_id,
                    url,
                    container: f.ext.unwrap_or_default(),
                    height: f.height,
                    bitrate_kbps: f.tbr,
                    filesize: f.filesize.or(f.filesize_approx),
                    http_headers: f.http_headers,
                    resolver: self.name().to_string(),
                })
            })
            .collect();

        MediaInfo {
            title: dump.title,
            is_live: reports_live(dump.is_live, dump.live_status.as_deref()),
            duration_secs: dump.duration,
            formats,
        }
    }
}

/// Map yt-dlp's diagnostic output to a resolver error
fn classify_failure(stderr: &str) -> ResolveError {
    let message = stderr
        .lines()
        .rev()
        .find(|line| line.contains("ERROR"))
        .or_else(|| stderr.lines().rev().find(|line| !line.trim().is_empty()))
        .unwrap_or("yt-dlp failed without output")
        .trim()
        .to_string();

    if message.contains("Unsupported URL") || message.contains("is not a valid URL") {
        ResolveError::InvalidUrl(message)
    } else {
        ResolveError::Unavailable(message)
    }
}

/// Build a classification from a flat yt-dlp listing
fn classification_from_listing(url: &str, listing: FlatListing) -> Classification {
    let thumbnail = listing
        .thumbnail
        .clone()
        .or_else(|| listing.thumbnails.last().map(|t| t.url.clone()));
    let is_live = reports_live(listing.is_live, listing.live_status.as_deref());

    match listing.kind.as_deref() {
        Some("playlist") => {
            let items: Vec<MediaReference> = listing
                .entries
                .into_iter()
                .flatten()
                .enumerate()
                .filter_map(|(index, entry)| {
                    let url = match (entry.url, entry.id) {
                        (Some(url), _) if url.starts_with("http") => url,
                        (_, Some(id)) => format!("https://www.youtube.com/watch?v={}", id),
                        _ => return None,
                    };
                    let title = entry
                        .title
                        .unwrap_or_else(|| format!("Track {}", index + 1));
                    Some(MediaReference { url, title })
                })
                .collect();

            Classification {
                kind: if is_mixed_url(url) {
                    ContentKind::Mixed
                } else {
                    ContentKind::Playlist
                },
                title: listing.title,
                thumbnail,
                items,
                is_live: false,
            }
        }
        Some("video") | None if listing.title.is_some() => {
            let title = listing.title.clone().unwrap_or_default();
            Classification {
                kind: ContentKind::Single,
                title: listing.title,
                thumbnail,
                items: vec![MediaReference::new(url, title)],
                is_live,
            }
        }
        _ => Classification {
            kind: ContentKind::Unknown,
            title: listing.title,
            thumbnail,
            items: Vec::new(),
            is_live,
        },
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn supports_url(&self, url: &str) -> bool {
        // Support various YouTube URL formats
        let url_lower = url.to_lowercase();
        url_lower.contains("youtube.com/watch")
            || url_lower.contains("youtu.be/")
            || url_lower.contains("youtube.com/embed/")
            || url_lower.contains("youtube.com/shorts/")
            || url_lower.contains("youtube.com/playlist")
            || url_lower.contains("youtube.com/v/")
            || url_lower.contains("m.youtube.com/")
            || url_lower.contains("music.youtube.com/")
    }

    async fn resolve(&self, url: &str) -> Result<MediaInfo, ResolveError> {
        let stdout = self
            .run_json(&["--dump-json", "--no-playlist"], url)
            .await?;

        let dump: VideoDump = serde_json::from_slice(&stdout)
            .map_err(|e| ResolveError::Unavailable(format!("unreadable yt-dlp output: {}", e)))?;

        let info = self.media_info_from_dump(dump);
        tracing::debug!(
            "yt-dlp resolved {} ({} usable formats, live: {})",
            url,
            info.formats.len(),
            info.is_live
        );
        Ok(info)
    }

    async fn open(
        &self,
        url: &str,
        format: &FormatDescriptor,
    ) -> Result<OpenedStream, ResolveError> {
        tracing::debug!("Opening format {} of {}", format.format_id, url);
        open_http_stream(&self.client, format).await
    }
}

#[async_trait]
impl Classifier for YtDlpResolver {
    async fn classify(&self, url: &str) -> Result<Classification, ResolveError> {
        let stdout = self
            .run_json(&["--flat-playlist", "--dump-single-json"], url)
            .await?;

        let listing: FlatListing = serde_json::from_slice(&stdout)
            .map_err(|e| ResolveError::Unavailable(format!("unreadable yt-dlp output: {}", e)))?;

        Ok(classification_from_listing(url, listing))
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new(PathBuf::from("yt-dlp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIDEO_JSON: &str = r#"{
        "title": "Test Song",
        "is_live": false,
        "live_status": "not_live",
        "duration": 212.0,
        "formats": [
            {"format_id": "sb0", "url": "https://i.ytimg.com/sb", "ext": "mhtml",
             "vcodec": "none", "acodec": "none", "protocol": "mhtml"},
            {"format_id": "140", "url": "https://rr.googlevideo.com/140", "ext": "m4a",
             "vcodec": "none", "acodec": "mp4a.40.2", "tbr": 129.5, "protocol": "https"},
            {"format_id": "18", "url": "https://rr.googlevideo.com/18", "ext": "mp4",
             "vcodec": "avc1.42001E", "acodec": "mp4a.40.2", "height": 360,
             "filesize_approx": 9000000, "protocol": "https",
             "http_headers": {"User-Agent": "Mozilla/5.0"}},
            {"format_id": "96", "url": "https://manifest.googlevideo.com/96", "ext": "mp4",
             "vcodec": "avc1.640028", "acodec": "mp4a.40.2", "height": 1080,
             "protocol": "m3u8_native"}
        ]
    }"#;

    #[test]
    fn test_media_info_from_dump() {
        let resolver = YtDlpResolver::default();
        let dump: VideoDump = serde_json::from_str(VIDEO_JSON).unwrap();
        let info = resolver.media_info_from_dump(dump);

        assert_eq!(info.title.as_deref(), Some("Test Song"));
        assert!(!info.is_live);
        // mhtml storyboards and HLS manifests are not plain downloads
        assert_eq!(info.formats.len(), 2);

        let chosen = info.resolve_format().unwrap().chosen_format;
        assert_eq!(chosen.format_id, "18");
        assert_eq!(chosen.filesize, Some(9000000));
        assert_eq!(chosen.resolver, "yt-dlp");
        assert_eq!(chosen.http_headers.get("User-Agent").map(String::as_str), Some("Mozilla/5.0"));
    }

    #[test]
    fn test_live_detection() {
        assert!(reports_live(Some(true), None));
        assert!(reports_live(None, Some("is_live")));
        assert!(reports_live(Some(false), Some("is_upcoming")));
        assert!(!reports_live(Some(false), Some("was_live")));
        assert!(!reports_live(None, None));
    }

    #[test]
    fn test_classify_failure() {
        let err = classify_failure("ERROR: Unsupported URL: https://example.com\n");
        assert!(matches!(err, ResolveError::InvalidUrl(_)));

        let err = classify_failure("WARNING: x\nERROR: [youtube] abc: Video unavailable\n");
        match err {
            ResolveError::Unavailable(message) => assert!(message.contains("Video unavailable")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_playlist_listing() {
        let listing: FlatListing = serde_json::from_str(
            r#"{
                "_type": "playlist",
                "title": "Road Trip",
                "thumbnails": [{"url": "https://i.ytimg.com/small"}, {"url": "https://i.ytimg.com/large"}],
                "entries": [
                    {"id": "aaa", "url": "https://www.youtube.com/watch?v=aaa", "title": "A"},
                    null,
                    {"id": "bbb", "title": null},
                    {"title": "no id"}
                ]
            }"#,
        )
        .unwrap();

        let classification =
            classification_from_listing("https://www.youtube.com/playlist?list=PL1", listing);
        assert_eq!(classification.kind, ContentKind::Playlist);
        assert_eq!(classification.title.as_deref(), Some("Road Trip"));
        assert_eq!(classification.thumbnail.as_deref(), Some("https://i.ytimg.com/large"));
        assert_eq!(
            classification.items,
            vec![
                MediaReference::new("https://www.youtube.com/watch?v=aaa", "A"),
                MediaReference::new("https://www.youtube.com/watch?v=bbb", "Track 2"),
            ]
        );
    }

    #[test]
    fn test_classify_mixed_and_single() {
        let listing: FlatListing =
            serde_json::from_str(r#"{"_type": "playlist", "title": "Mix", "entries": []}"#).unwrap();
        let classification =
            classification_from_listing("https://www.youtube.com/watch?v=x&list=PL1", listing);
        assert_eq!(classification.kind, ContentKind::Mixed);

        let listing: FlatListing = serde_json::from_str(
            r#"{"_type": "video", "title": "Solo", "thumbnail": "https://t", "live_status": "is_live"}"#,
        )
        .unwrap();
        let classification = classification_from_listing("https://youtu.be/x", listing);
        assert_eq!(classification.kind, ContentKind::Single);
        assert!(classification.is_live);
        assert_eq!(classification.items, vec![MediaReference::new("https://youtu.be/x", "Solo")]);

        let listing: FlatListing = serde_json::from_str(r#"{"_type": "url"}"#).unwrap();
        let classification = classification_from_listing("https://youtu.be/x", listing);
        assert_eq!(classification.kind, ContentKind::Unknown);
    }

    #[test]
    fn test_supports_url() {
        let resolver = YtDlpResolver::default();
        assert!(resolver.supports_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(resolver.supports_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(resolver.supports_url("https://www.youtube.com/playlist?list=PL1"));
        assert!(!resolver.supports_url("https://example.com/song.mp3"));
    }
}
