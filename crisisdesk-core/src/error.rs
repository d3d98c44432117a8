use thiserror::Error;

/// Core error type for crisisdesk.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum CrisisError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// The chat endpoint refused the handshake or sent no body.
    #[error("stream failed to start: {status} {message}")]
    StreamStart { status: u16, message: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream error from {service}: {code} {message}")]
    Upstream {
        service: String,
        code: String,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CrisisError {
    /// Stable short name used in logs and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::StreamStart { .. } => "stream_start",
            Self::Decode(_) => "decode",
            Self::Network(_) => "network",
            Self::Upstream { .. } => "upstream",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, CrisisError>;
