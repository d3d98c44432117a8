use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeOutcome {
    /// The endpoint sent `[DONE]`.
    Completed,
    /// The body ended without the sentinel.
    Ended,
    /// The exchange failed and the fallback message was appended.
    Failed,
}

impl ExchangeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Ended => "ended",
            Self::Failed => "failed",
        }
    }
}

/// Structured record of one chat exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeLog {
    pub backend: String,
    pub outcome: ExchangeOutcome,
    pub latency_ms: u64,
    pub bytes_read: u64,
    pub dropped_lines: u32,
    /// Length of the assembled reply in characters.
    pub content_chars: usize,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl ExchangeLog {
    pub fn new(backend: &str, outcome: ExchangeOutcome) -> Self {
        Self {
            backend: backend.to_string(),
            outcome,
            latency_ms: 0,
            bytes_read: 0,
            dropped_lines: 0,
            content_chars: 0,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn stream(mut self, bytes_read: u64, dropped_lines: u32, content_chars: usize) -> Self {
        self.bytes_read = bytes_read;
        self.dropped_lines = dropped_lines;
        self.content_chars = content_chars;
        self
    }

    pub fn error(mut self, err: &crate::error::CrisisError) -> Self {
        self.error_kind = Some(err.kind().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}
