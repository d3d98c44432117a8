/// Span/Log attribute keys for chat exchanges.
/// Keep these stable; changing them breaks log queries.
pub const KEY_BACKEND: &str = "chat.backend";
pub const KEY_TRANSCRIPT_LEN: &str = "chat.transcript_len";
pub const KEY_OUTCOME: &str = "chat.outcome";

pub const KEY_LATENCY_MS: &str = "latency.ms";
pub const KEY_BYTES_READ: &str = "stream.bytes";
pub const KEY_DROPPED_LINES: &str = "stream.dropped_lines";
pub const KEY_CONTENT_CHARS: &str = "reply.chars";

pub const KEY_ERROR_KIND: &str = "error.kind";
