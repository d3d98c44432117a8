use unicode_normalization::UnicodeNormalization;

/// Upper bound on a single user message, in characters.
pub const MAX_USER_MESSAGE_CHARS: usize = 4_000;

fn clean_text(s: &str) -> String {
    // Unicode NFC normalization + BOM strip + CRLF -> LF + trim
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

/// Clean a message typed by the user before it enters the transcript.
/// Returns `None` when nothing sendable is left.
pub fn normalize_user_message(s: &str) -> Option<String> {
    let mut t = clean_text(s);
    if t.is_empty() {
        return None;
    }
    if let Some((idx, _)) = t.char_indices().nth(MAX_USER_MESSAGE_CHARS) {
        t.truncate(idx);
    }
    Some(t)
}
