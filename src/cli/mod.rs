use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ConfigOverrides;

#[derive(Parser)]
#[command(
    name = "tubetape",
    about = "TubeTape - Extract MP3 audio from YouTube videos and playlists",
    version,
    long_about = "Downloads videos or whole playlists through yt-dlp, converts them to 192 kbps MP3 with FFmpeg and delivers a single file or a ZIP archive. Runs as a one-shot CLI or as an HTTP service."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub tools: ToolArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Overrides for the external tools and scratch space
#[derive(Args, Debug, Clone, Default)]
pub struct ToolArgs {
    /// Path to the yt-dlp executable
    #[arg(long, global = true, env = "TUBETAPE_YT_DLP", value_name = "PATH")]
    pub yt_dlp: Option<PathBuf>,

    /// Path to the ffmpeg executable
    #[arg(long, global = true, env = "TUBETAPE_FFMPEG", value_name = "PATH")]
    pub ffmpeg: Option<PathBuf>,

    /// Directory for temporary request workspaces
    #[arg(long, global = true, env = "TUBETAPE_TEMP_DIR", value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download a video as an MP3 file, or a playlist URL as a ZIP archive
    Download {
        /// Video URL (YouTube or a direct media link)
        #[arg(value_name = "URL")]
        url: String,

        /// Title used for the output filename (defaults to the video title)
        #[arg(short, long)]
        title: Option<String>,

        /// Directory to write the file to
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        output: PathBuf,

        /// Only fetch the video when the URL also names a playlist
        #[arg(long)]
        no_playlist: bool,
    },

    /// Download every item of a playlist into one ZIP archive
    Playlist {
        /// Playlist URL; its items are listed through yt-dlp
        #[arg(value_name = "URL", required_unless_present = "items")]
        url: Option<String>,

        /// JSON file with `[{"url": ..., "title": ...}]` instead of a playlist URL
        #[arg(long, value_name = "FILE", conflicts_with = "url")]
        items: Option<PathBuf>,

        /// Archive name (defaults to the playlist title)
        #[arg(short, long)]
        title: Option<String>,

        /// Directory to write the archive to
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        output: PathBuf,
    },

    /// Report whether a URL is a single video, a playlist or both
    Classify {
        #[arg(value_name = "URL")]
        url: String,
    },

    /// Run the HTTP API
    Serve {
        /// Listen address, e.g. 127.0.0.1:8080
        #[arg(short, long, env = "TUBETAPE_BIND", value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Show the active configuration
    Config {
        /// Print the config file location only
        #[arg(long)]
        path: bool,
    },

    /// Check that yt-dlp and ffmpeg are available
    Check,
}

impl Cli {
    /// Overrides collected from flags and environment
    pub fn overrides(&self) -> ConfigOverrides {
        let bind = match &self.command {
            Commands::Serve { bind } => bind.clone(),
            _ => None,
        };

        ConfigOverrides {
            yt_dlp_path: self.tools.yt_dlp.clone(),
            ffmpeg_path: self.tools.ffmpeg.clone(),
            temp_root: self.tools.temp_dir.clone(),
            bind,
        }
    }
}
