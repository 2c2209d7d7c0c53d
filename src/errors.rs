//! Error taxonomy for the relay core.
//!
//! Every variant is handled at the boundary where it occurs. Transport failures are
//! retried and then skipped, upstream failures become a short reply to the peer, and
//! validation or saturation failures are dropped with a log line.
use thiserror::Error;

/// Failure reported by the text generation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub detail: String,
}

impl UpstreamError {
    pub fn http(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            detail: detail.into(),
        }
    }

    pub fn other(detail: impl Into<String>) -> Self {
        Self {
            status: None,
            detail: detail.into(),
        }
    }
}

// Rendered verbatim as the reply text sent back over the mesh.
impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(code) => write!(f, "HTTP error {}: {}", code, self.detail),
            None => write!(f, "Error: {}", self.detail),
        }
    }
}

impl std::error::Error for UpstreamError {}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("invalid packet: {0}")]
    Validation(String),
    #[error("admission denied: {0}")]
    Saturation(String),
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;
