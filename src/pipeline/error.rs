//! Error taxonomy surfaced to callers of the pipeline.

use thiserror::Error;

use crate::resolver::{MediaReference, ResolveError};
use crate::transcode::TranscodeError;

/// Errors a download request can end with
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Rejected before any resource was allocated
    #[error("{0}")]
    InvalidInput(String),

    #[error("\"{title}\" is a live stream; live content cannot be downloaded")]
    LiveStreamUnsupported { title: String },

    #[error("No downloadable audio or video format found for \"{title}\"")]
    NoSuitableFormat { title: String },

    #[error("\"{title}\" is unavailable ({url}): {reason}")]
    Unavailable {
        title: String,
        url: String,
        reason: String,
    },

    #[error("Downloading \"{title}\" failed ({url}): {reason}")]
    Stream {
        title: String,
        url: String,
        reason: String,
    },

    /// `diagnostics` holds transcoder output and is only ever logged
    #[error("Audio conversion failed for \"{title}\": {reason}")]
    Transcode {
        title: String,
        reason: String,
        diagnostics: Option<String>,
    },

    #[error("File error while processing \"{context}\": {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not build the archive: {0}")]
    Archive(String),

    #[error("None of the {failed} playlist item(s) could be downloaded; first error: {first_reason}")]
    NothingSucceeded { failed: usize, first_reason: String },

    #[error("Download cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Attach item context to a resolver failure
    pub fn from_resolve(error: ResolveError, reference: &MediaReference) -> Self {
        let title = display_title(reference);
        match error {
            ResolveError::InvalidUrl(reason) => Self::InvalidInput(format!(
                "Invalid URL for \"{}\" ({}): {}",
                title, reference.url, reason
            )),
            ResolveError::Unavailable(reason) | ResolveError::Unsupported(reason) => {
                Self::Unavailable {
                    title,
                    url: reference.url.clone(),
                    reason,
                }
            }
            ResolveError::Stream(reason) => Self::Stream {
                title,
                url: reference.url.clone(),
                reason,
            },
        }
    }

    /// Attach item context to a transcoder failure
    pub fn from_transcode(error: TranscodeError, reference: &MediaReference) -> Self {
        let title = display_title(reference);
        match error {
            TranscodeError::Cancelled => Self::Cancelled,
            TranscodeError::Failed {
                reason,
                diagnostics,
            } => Self::Transcode {
                title,
                reason,
                diagnostics,
            },
            other => Self::Transcode {
                title,
                reason: other.to_string(),
                diagnostics: None,
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::LiveStreamUnsupported { .. } => "live_stream_unsupported",
            Self::NoSuitableFormat { .. } => "no_suitable_format",
            Self::Unavailable { .. } => "unavailable",
            Self::Stream { .. } => "stream_error",
            Self::Transcode { .. } => "transcode_error",
            Self::Io { .. } => "io_error",
            Self::Archive(_) => "archive_error",
            Self::NothingSucceeded { .. } => "nothing_succeeded",
            Self::Cancelled => "cancelled",
        }
    }

    /// Text safe to show the end user: names the item, hides internals
    pub fn user_message(&self) -> String {
        match self {
            Self::Transcode { title, .. } => {
                format!("Audio conversion failed for \"{}\"", title)
            }
            Self::Io { context, .. } => {
                format!("Internal file error while processing \"{}\"", context)
            }
            Self::Archive(_) => "Could not build the archive".to_string(),
            other => other.to_string(),
        }
    }

    /// Transcoder diagnostics, for server-side logs only
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::Transcode { diagnostics, .. } => diagnostics.as_deref(),
            _ => None,
        }
    }
}

/// Title used in messages: the caller's title, else the URL
pub fn display_title(reference: &MediaReference) -> String {
    if reference.title.trim().is_empty() {
        reference.url.clone()
    } else {
        reference.title.clone()
    }
}
