use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External tool locations
    pub tools: ToolsConfig,

    /// Scratch space for in-flight requests
    pub workspace: WorkspaceConfig,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Playlist limits
    pub playlist: PlaylistConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// yt-dlp executable (name on PATH or absolute path)
    pub yt_dlp_path: PathBuf,

    /// ffmpeg executable (name on PATH or absolute path)
    pub ffmpeg_path: PathBuf,

    /// Log level passed to ffmpeg
    pub ffmpeg_log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Parent directory of request workspaces (system temp dir if unset)
    pub temp_root: Option<PathBuf>,

    /// Delay before a finished workspace is deleted, in milliseconds
    pub cleanup_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistConfig {
    /// Largest playlist accepted in one request
    pub max_items: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffmpeg_log_level: "error".to_string(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            temp_root: None,
            cleanup_delay_ms: 1000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self { max_items: 200 }
    }
}

/// Values given on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub yt_dlp_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    pub temp_root: Option<PathBuf>,
    pub bind: Option<String>,
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path).await
    }

    /// Load configuration from `path`, writing defaults there if it is missing
    pub async fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs_err::read_to_string(path).context("Failed to read config file")?;

            let config: Config =
                serde_yaml::from_str(&content).context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            if let Err(e) = config.save_to(path).await {
                tracing::debug!("Could not write default config to {}: {:#}", path.display(), e);
            }
            Ok(config)
        }
    }

    /// Write configuration as YAML, creating parent directories
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("tubetape").join("config.yaml"))
    }

    /// Apply command-line and environment overrides, then re-validate
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Result<Self> {
        if let Some(path) = overrides.yt_dlp_path {
            self.tools.yt_dlp_path = path;
        }
        if let Some(path) = overrides.ffmpeg_path {
            self.tools.ffmpeg_path = path;
        }
        if let Some(path) = overrides.temp_root {
            self.workspace.temp_root = Some(path);
        }
        if let Some(bind) = overrides.bind {
            self.server.bind = bind;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.tools.yt_dlp_path.as_os_str().is_empty() {
            anyhow::bail!("tools.yt_dlp_path must not be empty");
        }
        if self.tools.ffmpeg_path.as_os_str().is_empty() {
            anyhow::bail!("tools.ffmpeg_path must not be empty");
        }
        if self.playlist.max_items == 0 {
            anyhow::bail!("playlist.max_items must be at least 1");
        }
        self.bind_addr()?;

        Ok(())
    }

    /// Parsed server listen address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("Invalid server.bind address: {}", self.server.bind))
    }

    /// Directory that holds request workspaces
    pub fn temp_root(&self) -> PathBuf {
        self.workspace
            .temp_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("tubetape"))
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  yt-dlp: {}", self.tools.yt_dlp_path.display());
        println!("  ffmpeg: {}", self.tools.ffmpeg_path.display());
        println!("  ffmpeg log level: {}", self.tools.ffmpeg_log_level);
        println!("  Temp root: {}", self.temp_root().display());
        println!("  Cleanup delay: {} ms", self.workspace.cleanup_delay_ms);
        println!("  Server bind: {}", self.server.bind);
        println!("  Max playlist items: {}", self.playlist.max_items);
    }
}
