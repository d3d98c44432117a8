use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The two mutations a stream is allowed to make to a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptUpdate {
    /// Start a new assistant message with this content.
    AppendAssistant(String),
    /// Replace the content of the trailing assistant message.
    ReplaceLast(String),
}

/// Ordered, append-mostly sequence of chat messages.
///
/// Only the trailing assistant message may change after insertion, and only
/// through [`Transcript::apply`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_greeting(greeting: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::assistant(greeting)],
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    /// Merge one stream update into the transcript.
    ///
    /// `ReplaceLast` on a transcript whose tail is not an assistant message
    /// degrades to an append so a user message is never overwritten.
    pub fn apply(&mut self, update: TranscriptUpdate) {
        match update {
            TranscriptUpdate::AppendAssistant(content) => self.push_assistant(content),
            TranscriptUpdate::ReplaceLast(content) => match self.messages.last_mut() {
                Some(last) if last.role == Role::Assistant => last.content = content,
                _ => self.push_assistant(content),
            },
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Body of the outbound chat request.
#[derive(Debug, Serialize)]
pub struct ChatBody<'a> {
    pub messages: &'a [Message],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_json_lowercase() {
        let json = r#"{"role":"assistant","content":"ok"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        let back = serde_json::to_string(&msg).unwrap();
        assert!(back.contains("\"assistant\""));
    }

    #[test]
    fn chat_body_serializes_transcript() {
        let mut t = Transcript::with_greeting("How can I help?");
        t.push_user("Is there a flood warning?");
        let body = serde_json::to_value(ChatBody {
            messages: t.messages(),
        })
        .unwrap();
        assert_eq!(body["messages"][0]["role"], "assistant");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Is there a flood warning?");
    }

    #[test]
    fn replace_last_never_overwrites_user() {
        let mut t = Transcript::new();
        t.push_user("hi");
        t.apply(TranscriptUpdate::ReplaceLast("hello".into()));
        assert_eq!(t.len(), 2);
        assert_eq!(t.messages()[0], Message::user("hi"));
        assert_eq!(t.last(), Some(&Message::assistant("hello")));

        t.apply(TranscriptUpdate::ReplaceLast("hello there".into()));
        assert_eq!(t.len(), 2);
        assert_eq!(t.last().unwrap().content, "hello there");
    }
}
