use async_trait::async_trait;
use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};

use crate::config::ChatCfg;
use crate::error::CoreResult;
use crate::http_client::HttpClient;
use crate::model::{ChatBody, Message};
use crate::stream::ByteStream;

/// Something that answers a transcript with a `data:` event stream.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Start one exchange. Errors here happen before any body byte is read.
    async fn open_stream(&self, messages: &[Message]) -> CoreResult<ByteStream>;
}

/// The remote chat function: one bearer-authenticated POST per exchange.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: HttpClient,
    endpoint: String,
    api_key: SecretString,
}

impl ChatClient {
    pub fn new(http: HttpClient, endpoint: String, api_key: SecretString) -> Self {
        Self {
            http,
            endpoint,
            api_key,
        }
    }

    pub fn from_cfg(http: HttpClient, cfg: &ChatCfg) -> CoreResult<Self> {
        Ok(Self::new(http, cfg.endpoint.clone(), cfg.api_key()?))
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key.expose_secret()),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    fn name(&self) -> &str {
        "remote"
    }

    async fn open_stream(&self, messages: &[Message]) -> CoreResult<ByteStream> {
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.http
            .post_stream(&self.endpoint, &ChatBody { messages }, &hdrs)
            .await
    }
}

/// Replays a fixed body, split into the given chunks.
/// Useful for tests or offline runs of the CLI.
#[derive(Debug, Clone, Default)]
pub struct CannedBackend {
    chunks: Vec<Bytes>,
}

impl CannedBackend {
    pub fn new<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }

    /// A well-formed stream that streams `reply` word by word.
    pub fn reply(reply: &str) -> Self {
        let mut chunks: Vec<Bytes> = reply
            .split_inclusive(' ')
            .map(|word| {
                let payload = serde_json::json!({"choices":[{"delta":{"content": word}}]});
                Bytes::from(format!("data: {payload}\n\n"))
            })
            .collect();
        chunks.push(Bytes::from_static(b"data: [DONE]\n\n"));
        Self { chunks }
    }
}

#[async_trait]
impl ChatBackend for CannedBackend {
    fn name(&self) -> &str {
        "canned"
    }

    async fn open_stream(&self, _messages: &[Message]) -> CoreResult<ByteStream> {
        let items: Vec<CoreResult<Bytes>> = self.chunks.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::assemble;
    use crate::config::AssemblerCfg;
    use crate::error::CrisisError;
    use crate::model::Transcript;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    fn client_for(server: &MockServer) -> ChatClient {
        ChatClient::new(
            HttpClient::new_default().unwrap(),
            format!("{}/functions/v1/chat", server.base_url()),
            SecretString::new("test-key".into()),
        )
    }

    #[tokio::test]
    async fn posts_transcript_with_bearer_token() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/functions/v1/chat")
                .header("authorization", "Bearer test-key")
                .json_body(json!({"messages":[
                    {"role":"assistant","content":"Hi"},
                    {"role":"user","content":"Any alerts?"}
                ]}));
            then.status(200).body(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"No active \"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"alerts.\"}}]}\n\n",
                "data: [DONE]\n\n",
            ));
        });

        let mut t = Transcript::with_greeting("Hi");
        t.push_user("Any alerts?");
        let body = client_for(&server).open_stream(t.messages()).await.unwrap();
        let report = assemble(body, &mut t, AssemblerCfg::default(), |_| {})
            .await
            .unwrap();
        m.assert();
        assert_eq!(report.content, "No active alerts.");
        assert_eq!(t.len(), 3);
    }

    #[tokio::test]
    async fn server_error_is_stream_start() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/functions/v1/chat");
            then.status(500).body("boom");
        });
        let err = client_for(&server)
            .open_stream(&[Message::user("hi")])
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, CrisisError::StreamStart { status: 500, .. }));
    }

    #[tokio::test]
    async fn canned_reply_assembles_back_to_text() {
        let backend = CannedBackend::reply("Move to higher ground now.");
        let mut t = Transcript::new();
        t.push_user("flood?");
        let body = backend.open_stream(t.messages()).await.unwrap();
        let report = assemble(body, &mut t, AssemblerCfg::default(), |_| {})
            .await
            .unwrap();
        assert!(report.done);
        assert_eq!(report.content, "Move to higher ground now.");
    }
}
