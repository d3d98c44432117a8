//! Turns a chunked `data:` event stream into an assistant reply.
//!
//! Framing: newline-delimited UTF-8. Blank lines and `:` comments are ignored,
//! `data: <json>` lines carry `choices[0].delta.content`, and the payload
//! `[DONE]` ends the reply.
//!
//! A `data:` line whose payload does not parse is pushed back to the front of
//! the buffer and retried on the next read. After
//! [`AssemblerCfg::max_line_retries`] further reads it is dropped and counted
//! in [`AssemblyReport::dropped_lines`].

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;

use crate::config::AssemblerCfg;
use crate::decoder::Utf8Decoder;
use crate::error::{CoreResult, CrisisError};
use crate::model::{Role, Transcript, TranscriptUpdate};
use crate::stream::StreamEvent;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Summary of one finished assembly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssemblyReport {
    /// Full assistant text assembled from the stream.
    pub content: String,
    /// Whether the `[DONE]` sentinel was seen.
    pub done: bool,
    /// `data:` lines discarded because their payload never parsed.
    pub dropped_lines: u32,
    pub bytes_read: u64,
}

enum LineOutcome {
    Consumed,
    Done,
    Unparsed(serde_json::Error),
}

/// Per-stream decoder state.
#[derive(Debug)]
pub struct StreamAssembler {
    limits: AssemblerCfg,
    decoder: Utf8Decoder,
    text_buffer: String,
    assistant_content: String,
    stream_done: bool,
    // True once this stream has put its assistant message into the transcript.
    building: bool,
    head_retries: u32,
    dropped_lines: u32,
    bytes_read: u64,
}

impl StreamAssembler {
    pub fn new(limits: AssemblerCfg) -> Self {
        Self {
            limits,
            decoder: Utf8Decoder::new(),
            text_buffer: String::new(),
            assistant_content: String::new(),
            stream_done: false,
            building: false,
            head_retries: 0,
            dropped_lines: 0,
            bytes_read: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.stream_done
    }

    pub fn content(&self) -> &str {
        &self.assistant_content
    }

    /// Consume one network chunk, applying any completed deltas to `transcript`
    /// and appending their events to `events`.
    ///
    /// Events for deltas already applied are appended even when an oversized
    /// line makes this call fail. Chunks arriving after the sentinel are
    /// ignored.
    pub fn feed(
        &mut self,
        chunk: &[u8],
        transcript: &mut Transcript,
        events: &mut Vec<StreamEvent>,
    ) -> CoreResult<()> {
        if self.stream_done {
            return Ok(());
        }
        self.bytes_read += chunk.len() as u64;
        self.decoder.decode_into(chunk, &mut self.text_buffer);

        self.drain_lines(transcript, false, events);
        self.check_line_size()
    }

    /// End of input: flush the decoder, settle requeued lines, and process a
    /// final line that lacks its newline.
    pub fn finish(
        mut self,
        transcript: &mut Transcript,
    ) -> (Vec<StreamEvent>, AssemblyReport) {
        let mut events = Vec::new();
        if !self.stream_done {
            if let Some(c) = self.decoder.finish() {
                self.text_buffer.push(c);
            }
            self.drain_lines(transcript, true, &mut events);
            if !self.stream_done && !self.text_buffer.is_empty() {
                let mut tail = std::mem::take(&mut self.text_buffer);
                if tail.ends_with('\r') {
                    tail.pop();
                }
                match self.process_line(&tail, transcript, &mut events) {
                    LineOutcome::Unparsed(err) => self.drop_line(&tail, &err),
                    LineOutcome::Consumed | LineOutcome::Done => {}
                }
            }
        }
        let report = AssemblyReport {
            content: self.assistant_content,
            done: self.stream_done,
            dropped_lines: self.dropped_lines,
            bytes_read: self.bytes_read,
        };
        (events, report)
    }

    fn drain_lines(
        &mut self,
        transcript: &mut Transcript,
        at_eof: bool,
        events: &mut Vec<StreamEvent>,
    ) {
        while !self.stream_done {
            let Some(idx) = self.text_buffer.find('\n') else {
                break;
            };
            let mut line: String = self.text_buffer.drain(..=idx).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }

            match self.process_line(&line, transcript, events) {
                LineOutcome::Consumed => self.head_retries = 0,
                LineOutcome::Done => {
                    self.head_retries = 0;
                    tracing::debug!(bytes = self.bytes_read, "stream sentinel received");
                }
                LineOutcome::Unparsed(err) => {
                    if at_eof || self.head_retries >= self.limits.max_line_retries {
                        self.drop_line(&line, &err);
                        continue;
                    }
                    // Lines queued behind this one, a sentinel included, wait
                    // for the next read or end of input.
                    self.head_retries += 1;
                    tracing::trace!(retry = self.head_retries, "requeueing unparsed line");
                    line.push('\n');
                    self.text_buffer.insert_str(0, &line);
                    break;
                }
            }
        }
    }

    fn process_line(
        &mut self,
        line: &str,
        transcript: &mut Transcript,
        events: &mut Vec<StreamEvent>,
    ) -> LineOutcome {
        if line.is_empty() || line.starts_with(':') {
            return LineOutcome::Consumed;
        }
        let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
            return LineOutcome::Consumed;
        };
        let payload = rest.trim();
        if payload == DONE_SENTINEL {
            self.stream_done = true;
            events.push(StreamEvent::Done);
            return LineOutcome::Done;
        }

        let parsed: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => return LineOutcome::Unparsed(e),
        };
        if let Some(delta) = text_delta(&parsed).filter(|d| !d.is_empty()) {
            self.assistant_content.push_str(delta);
            let update = if self.building
                && transcript.last().is_some_and(|m| m.role == Role::Assistant)
            {
                TranscriptUpdate::ReplaceLast(self.assistant_content.clone())
            } else {
                TranscriptUpdate::AppendAssistant(self.assistant_content.clone())
            };
            transcript.apply(update);
            self.building = true;
            events.push(StreamEvent::DeltaText(delta.to_string()));
        }
        LineOutcome::Consumed
    }

    fn drop_line(&mut self, line: &str, err: &serde_json::Error) {
        self.dropped_lines += 1;
        self.head_retries = 0;
        let err = CrisisError::Decode(err.to_string());
        tracing::warn!(
            error = %err,
            line_len = line.len(),
            "dropping data line with unparseable payload"
        );
    }

    /// Only the unterminated tail counts; a requeued head line is complete.
    fn check_line_size(&self) -> CoreResult<()> {
        let tail_start = self.text_buffer.rfind('\n').map_or(0, |i| i + 1);
        if !self.stream_done && self.text_buffer.len() - tail_start > self.limits.max_line_bytes {
            return Err(CrisisError::Decode(format!(
                "unterminated line exceeds {} bytes",
                self.limits.max_line_bytes
            )));
        }
        Ok(())
    }
}

/// `choices[0].delta.content`, when it is a string.
fn text_delta(v: &Value) -> Option<&str> {
    v.get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
}

/// Drive an assembler over a whole response body.
///
/// Reading stops at the sentinel or when `body` ends. A read error aborts
/// with whatever content was already applied left in `transcript`.
pub async fn assemble<S, F>(
    mut body: S,
    transcript: &mut Transcript,
    limits: AssemblerCfg,
    mut on_event: F,
) -> CoreResult<AssemblyReport>
where
    S: Stream<Item = CoreResult<bytes::Bytes>> + Unpin,
    F: FnMut(&StreamEvent),
{
    let mut asm = StreamAssembler::new(limits);
    let mut events = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        let fed = asm.feed(&chunk, transcript, &mut events);
        for ev in events.drain(..) {
            on_event(&ev);
        }
        fed?;
        if asm.is_done() {
            break;
        }
    }
    let (events, report) = asm.finish(transcript);
    for ev in &events {
        on_event(ev);
    }
    Ok(report)
}
