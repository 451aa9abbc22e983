use anyhow::Result;
use std::path::Path;
use url::Url;

/// Maximum length of a sanitized file name, in characters
pub const MAX_FILENAME_LEN: usize = 100;

/// Name used when a title sanitizes down to nothing usable
pub const FALLBACK_FILENAME: &str = "downloaded_file";

/// Validate a URL and return normalized version
pub fn validate_and_normalize_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url.trim())
        .map_err(|_| anyhow::anyhow!("Invalid URL format: {}", url))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("URL must use HTTP or HTTPS protocol: {}", url);
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        anyhow::bail!("URL has no host: {}", url);
    }

    Ok(parsed.to_string())
}

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Sanitize a title into a name that is safe on every common filesystem.
///
/// Characters outside `[A-Za-z0-9_.\- ]` become `_`, whitespace runs collapse
/// to one space, the result is trimmed and cut to [`MAX_FILENAME_LEN`]
/// characters, and a trailing `.` is replaced with `_`. Empty results and bare
/// extensions such as `.mp3` fall back to [`FALLBACK_FILENAME`].
///
/// The function is total and idempotent.
pub fn sanitize_filename(filename: &str) -> String {
    let mut collapsed = String::with_capacity(filename.len());
    let mut last_was_space = false;

    for c in filename.chars() {
        let mapped = match c {
            c if c.is_whitespace() => ' ',
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') => c,
            _ => '_',
        };

        if mapped == ' ' {
            if last_was_space {
                continue;
            }
            last_was_space = true;
        } else {
            last_was_space = false;
        }
        collapsed.push(mapped);
    }

    // Everything left is ASCII, so byte and char lengths agree.
    let mut name = collapsed.trim().to_string();
    name.truncate(MAX_FILENAME_LEN);
    let mut name = name.trim_end().to_string();

    if name.ends_with('.') {
        name.pop();
        name.push('_');
    }

    if name.is_empty() || is_bare_extension(&name) {
        return FALLBACK_FILENAME.to_string();
    }

    name
}

/// True for names like `.mp3` that consist of nothing but an extension
fn is_bare_extension(name: &str) -> bool {
    name.strip_prefix('.')
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or(false)
}

/// Check if the current environment has required tools
pub async fn check_dependencies(yt_dlp: &Path, ffmpeg: &Path) -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available(yt_dlp, "--version").await {
        missing.push(format!(
            "yt-dlp ({}) - required to resolve YouTube media",
            yt_dlp.display()
        ));
    }

    if !check_command_available(ffmpeg, "-version").await {
        missing.push(format!(
            "ffmpeg ({}) - required to extract MP3 audio",
            ffmpeg.display()
        ));
    }

    missing
}

/// Check if a command is available
async fn check_command_available(command: &Path, version_flag: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg(version_flag)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
