//! One conversation with the assistant.
//!
//! A send appends the user message, streams the reply into the transcript and,
//! when anything goes wrong, appends the configured fallback message instead
//! of surfacing a broken transcript. The error is still returned to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing_futures::Instrument;

use crate::assembler::{assemble, AssemblyReport};
use crate::chat::ChatBackend;
use crate::config::{AssemblerCfg, ChatCfg};
use crate::error::{CoreResult, CrisisError};
use crate::model::Transcript;
use crate::normalizer::normalize_user_message;
use crate::stream::StreamEvent;
use crate::telemetry::{self, ExchangeLog, ExchangeOutcome};

/// Shared "reply in flight" indicator.
///
/// Clones observe the same flag, so a UI can grey out its send control while
/// the session streams.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn try_acquire(&self) -> Option<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(self.0.clone()))
    }
}

/// Clears the busy flag when the send finishes or its future is dropped.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    transcript: Transcript,
    busy: BusyFlag,
    fallback: String,
    limits: AssemblerCfg,
    timeout: Option<Duration>,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, chat: &ChatCfg, limits: AssemblerCfg) -> Self {
        Self {
            backend,
            transcript: Transcript::with_greeting(chat.greeting.clone()),
            busy: BusyFlag::default(),
            fallback: chat.fallback.clone(),
            limits,
            timeout: chat.exchange_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn busy_flag(&self) -> BusyFlag {
        self.busy.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_busy()
    }

    /// Send one user message and stream the reply into the transcript.
    ///
    /// `on_event` sees every delta as it is applied. Dropping the returned
    /// future abandons the stream; content already applied stays.
    pub async fn send<F>(&mut self, text: &str, mut on_event: F) -> CoreResult<AssemblyReport>
    where
        F: FnMut(&StreamEvent),
    {
        let text = normalize_user_message(text)
            .ok_or_else(|| CrisisError::Validation("message is empty".into()))?;
        let _busy = self
            .busy
            .try_acquire()
            .ok_or_else(|| CrisisError::Validation("a reply is still streaming".into()))?;

        self.transcript.push_user(text);

        let span = tracing::info_span!(
            "chat.exchange",
            chat.backend = self.backend.name(),
            chat.transcript_len = self.transcript.len(),
            chat.outcome = tracing::field::Empty,
            latency.ms = tracing::field::Empty,
            stream.bytes = tracing::field::Empty,
            stream.dropped_lines = tracing::field::Empty,
            reply.chars = tracing::field::Empty,
            error.kind = tracing::field::Empty,
        );
        let started = Instant::now();

        let backend = self.backend.clone();
        let limits = self.limits;
        let transcript = &mut self.transcript;
        let exchange = async {
            let body = backend.open_stream(transcript.messages()).await?;
            assemble(body, transcript, limits, &mut on_event).await
        }
        .instrument(span.clone());

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, exchange).await {
                Ok(r) => r,
                Err(_) => Err(CrisisError::Network(format!(
                    "exchange timed out after {}ms",
                    limit.as_millis()
                ))),
            },
            None => exchange.await,
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        span.record(telemetry::KEY_LATENCY_MS, latency_ms);

        match result {
            Ok(report) => {
                let outcome = if report.done {
                    ExchangeOutcome::Completed
                } else {
                    ExchangeOutcome::Ended
                };
                let chars = report.content.chars().count();
                span.record(telemetry::KEY_OUTCOME, outcome.as_str());
                span.record(telemetry::KEY_BYTES_READ, report.bytes_read);
                span.record(telemetry::KEY_DROPPED_LINES, report.dropped_lines);
                span.record(telemetry::KEY_CONTENT_CHARS, chars as u64);
                if !report.done {
                    tracing::debug!(parent: &span, "stream ended without sentinel");
                }
                telemetry::emit_exchange(
                    ExchangeLog::new(self.backend.name(), outcome)
                        .latency_ms(latency_ms)
                        .stream(report.bytes_read, report.dropped_lines, chars),
                );
                Ok(report)
            }
            Err(err) => {
                span.record(telemetry::KEY_OUTCOME, ExchangeOutcome::Failed.as_str());
                span.record(telemetry::KEY_ERROR_KIND, err.kind());
                tracing::warn!(parent: &span, error = %err, "chat exchange failed");
                self.transcript.push_assistant(self.fallback.clone());
                telemetry::emit_exchange(
                    ExchangeLog::new(self.backend.name(), ExchangeOutcome::Failed)
                        .latency_ms(latency_ms)
                        .error(&err),
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::CannedBackend;
    use crate::model::{Message, Role};
    use crate::stream::ByteStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    static EXCHANGE_LOGS: Lazy<Mutex<Vec<ExchangeLog>>> = Lazy::new(|| Mutex::new(Vec::new()));

    struct VecSink;
    impl telemetry::TelemetrySink for VecSink {
        fn record_exchange(&self, log: ExchangeLog) {
            EXCHANGE_LOGS.lock().unwrap().push(log);
        }
    }

    fn cfg() -> ChatCfg {
        ChatCfg {
            greeting: "Hi, how can I help?".into(),
            fallback: "Sorry, try again.".into(),
            ..ChatCfg::default()
        }
    }

    fn session(backend: impl ChatBackend + 'static) -> ChatSession {
        ChatSession::new(Arc::new(backend), &cfg(), AssemblerCfg::default())
    }

    /// Never produces a byte; used for timeouts and cancellation.
    struct Stalled;

    #[async_trait]
    impl ChatBackend for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }
        async fn open_stream(&self, _messages: &[Message]) -> CoreResult<ByteStream> {
            Ok(Box::pin(futures::stream::pending::<CoreResult<Bytes>>()))
        }
    }

    #[tokio::test]
    async fn send_streams_reply_into_transcript() {
        let mut s = session(CannedBackend::reply("Shelters are open downtown."));
        let flag = s.busy_flag();
        let mut deltas = String::new();
        let report = s
            .send("  where can I go?  ", |ev| {
                assert!(flag.is_busy());
                if let Some(d) = ev.as_text_delta() {
                    deltas.push_str(d);
                }
            })
            .await
            .unwrap();

        assert!(!s.is_busy());
        assert_eq!(deltas, "Shelters are open downtown.");
        assert_eq!(report.content, deltas);
        let msgs = s.transcript().messages();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1], Message::user("where can I go?"));
        assert_eq!(msgs[2], Message::assistant("Shelters are open downtown."));
    }

    #[tokio::test]
    async fn handshake_failure_appends_fallback() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(503).body("unavailable");
        });
        let client = crate::chat::ChatClient::new(
            crate::http_client::HttpClient::new_default().unwrap(),
            format!("{}/chat", server.base_url()),
            secrecy::SecretString::new("k".into()),
        );
        let mut s = session(client);
        let err = s.send("status?", |_| {}).await.unwrap_err();
        assert!(matches!(err, CrisisError::StreamStart { status: 503, .. }));
        assert!(!s.is_busy());
        let msgs = s.transcript().messages();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[2], Message::assistant("Sorry, try again."));
    }

    #[tokio::test]
    async fn read_error_keeps_partial_content_then_fallback() {
        struct Broken;
        #[async_trait]
        impl ChatBackend for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            async fn open_stream(&self, _messages: &[Message]) -> CoreResult<ByteStream> {
                let items = vec![
                    Ok(Bytes::from_static(
                        b"data: {\"choices\":[{\"delta\":{\"content\":\"Go \"}}]}\n",
                    )),
                    Err(CrisisError::Network("reset".into())),
                ];
                Ok(Box::pin(futures::stream::iter(items)))
            }
        }

        let mut s = session(Broken);
        let err = s.send("now?", |_| {}).await.unwrap_err();
        assert!(matches!(err, CrisisError::Network(_)));
        let msgs = s.transcript().messages();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[2], Message::assistant("Go "));
        assert_eq!(msgs[3], Message::assistant("Sorry, try again."));

        // The transcript stays usable for the next attempt.
        s.backend = Arc::new(CannedBackend::reply("Go north."));
        s.send("again", |_| {}).await.unwrap();
        assert_eq!(s.transcript().last(), Some(&Message::assistant("Go north.")));
    }

    #[tokio::test]
    async fn blank_message_is_rejected_without_touching_transcript() {
        let mut s = session(CannedBackend::reply("unused"));
        let err = s.send("   ", |_| {}).await.unwrap_err();
        assert!(matches!(err, CrisisError::Validation(_)));
        assert_eq!(s.transcript().len(), 1);
    }

    #[tokio::test]
    async fn busy_session_rejects_second_send() {
        let mut s = session(CannedBackend::reply("unused"));
        let flag = s.busy_flag();
        let _held = flag.try_acquire().unwrap();
        let err = s.send("hello", |_| {}).await.unwrap_err();
        assert!(matches!(err, CrisisError::Validation(msg) if msg.contains("streaming")));
        assert_eq!(s.transcript().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_maps_to_network_and_clears_busy() {
        let chat = ChatCfg {
            exchange_timeout_ms: Some(50),
            ..cfg()
        };
        let mut s = ChatSession::new(Arc::new(Stalled), &chat, AssemblerCfg::default());
        let err = s.send("anyone?", |_| {}).await.unwrap_err();
        assert!(matches!(err, CrisisError::Network(msg) if msg.contains("timed out")));
        assert!(!s.is_busy());
        assert_eq!(s.transcript().last().unwrap().role, Role::Assistant);
        assert_eq!(s.transcript().last().unwrap().content, "Sorry, try again.");
    }

    #[tokio::test]
    async fn dropping_send_abandons_stream_and_clears_busy() {
        let mut s = session(Stalled);
        {
            let fut = s.send("hello", |_| {});
            let polled = tokio::time::timeout(Duration::from_millis(10), fut).await;
            assert!(polled.is_err());
        }
        assert!(!s.is_busy());
        // User message was recorded, no assistant reply and no fallback.
        assert_eq!(s.transcript().len(), 2);
        assert_eq!(s.transcript().last().unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn exchange_is_traced_and_logged() {
        let _ = telemetry::set_telemetry_sink(Arc::new(VecSink));
        telemetry::test_set_capture_enabled(true);
        EXCHANGE_LOGS.lock().unwrap().clear();
        let (store, _guard) = telemetry::test_span::install_capture();

        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
            "data: {broken\n",
            "data: [DONE]\n",
        );
        let mut s = session(CannedBackend::new([body]));
        let report = s.send("ping", |_| {}).await.unwrap();
        assert_eq!(report.dropped_lines, 1);

        let fields = store.fields_of("chat.exchange").expect("span recorded");
        assert_eq!(fields.get("chat.backend").map(String::as_str), Some("canned"));
        assert_eq!(fields.get("chat.outcome").map(String::as_str), Some("completed"));
        assert_eq!(fields.get("stream.dropped_lines").map(String::as_str), Some("1"));
        assert_eq!(fields.get("reply.chars").map(String::as_str), Some("2"));

        let logs = EXCHANGE_LOGS.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].outcome, ExchangeOutcome::Completed);
        assert_eq!(logs[0].content_chars, 2);
        telemetry::test_set_capture_enabled(false);
    }
}
