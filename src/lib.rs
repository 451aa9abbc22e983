//! TubeTape - extract MP3 audio from YouTube videos and playlists
//!
//! This library resolves video URLs through yt-dlp (or plain HTTP for direct
//! media links), converts each download to a 192 kbps MP3 with FFmpeg, and
//! delivers the result as a single file or a ZIP archive. Every request runs
//! in its own temporary workspace and can be cancelled at any point.

pub mod api;
pub mod archive;
pub mod cli;
pub mod config;
pub mod output;
pub mod pipeline;
pub mod resolver;
pub mod transcode;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use pipeline::{Pipeline, PipelineError, PlaylistRequest, SingleRequest};
pub use resolver::{Classifier, MediaReference, MediaResolver};
pub use transcode::Transcoder;

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;
