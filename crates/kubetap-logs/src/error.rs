use thiserror::Error;

use crate::demux::FramingError;

/// Errors reported by log streaming.
///
/// Cancellation is not an error: a stopped stream ends silently.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Connection or read failure of one source; siblings keep streaming
    #[error("{source_id}: {message}")]
    Transport { source_id: String, message: String },

    /// Corrupt multiplexed frame header; fatal for that one source
    #[error("{source_id}: {error}")]
    Framing {
        source_id: String,
        error: FramingError,
    },

    /// Sources could not be resolved, so nothing was started
    #[error("failed to resolve log sources: {0}")]
    Resolve(String),
}

impl StreamError {
    pub(crate) fn transport(source_id: &str, err: &anyhow::Error) -> Self {
        Self::Transport {
            source_id: source_id.to_string(),
            message: format!("{:#}", err),
        }
    }

    /// The source this error belongs to, if it is a per-source error
    pub fn source_id(&self) -> Option<&str> {
        match self {
            Self::Transport { source_id, .. } | Self::Framing { source_id, .. } => Some(source_id),
            Self::Resolve(_) => None,
        }
    }
}
