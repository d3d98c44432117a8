//! Streaming primitives exposed by crisisdesk.
//!
//! Contract:
//! - An assembly emits 0..n `DeltaText` events, then at most one `Done`.
//! - `Done` is only emitted when the `[DONE]` sentinel was seen; a stream that
//!   simply ends produces no terminal event.
//! - After `Done`, no further events are emitted.

use bytes::Bytes;

use crate::error::CoreResult;

/// What the caller receives incrementally while a reply is assembled.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Text appended to the assistant reply.
    DeltaText(String),
    /// The endpoint sent the termination sentinel.
    Done,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Convenience accessor for `DeltaText` contents.
    pub fn as_text_delta(&self) -> Option<&str> {
        match self {
            Self::DeltaText(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Boxed response body, one item per network chunk.
pub type ByteStream = futures::stream::BoxStream<'static, CoreResult<Bytes>>;
