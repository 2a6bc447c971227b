//! Incremental parser for the framed query response stream.
//!
//! The dual of the server's framer: consumes chunks at whatever byte
//! boundaries the transport produces and reconstructs the three payload
//! sections. Anything undecidable stays buffered until a later chunk
//! resolves it: a sentinel split across chunks, a half-received JSON
//! array, a citation marker cut mid-bracket, a UTF-8 sequence split
//! mid-character. One parser instance serves one request.

use searchhub_models::protocol::{LLM_RESPONSE_SENTINEL, RELATED_QUESTIONS_SENTINEL};
use searchhub_models::Source;
use searchhub_utils::{partial_marker_suffix, rewrite_citations};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePhase {
    AwaitingSources,
    StreamingAnswer,
    AwaitingRelated,
    Done,
}

/// Structured outputs, in the order a consumer's callbacks should fire.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    /// Fires at most once, when the source list is complete. Never fires
    /// if the stream ends without the sources sentinel: sources are then
    /// "unknown", which is not the same as "empty".
    Sources(Vec<Source>),
    /// The full rewritten answer so far; re-emitted as it grows, never
    /// with a partial citation marker at the tail.
    Answer(String),
    /// Fires at most once. An empty list means the server said "none",
    /// or the trailing section failed to parse and was degraded.
    Relates(Vec<String>),
}

#[derive(Debug)]
pub struct StreamParser {
    /// Bytes not yet decodable as UTF-8 (a split multibyte character).
    pending: Vec<u8>,
    /// Decoded text of the section currently being parsed.
    buf: String,
    phase: ParsePhase,
    source_count: usize,
    /// Length of the trimmed answer text last emitted, to suppress
    /// no-growth re-emits.
    emitted_len: usize,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            buf: String::new(),
            phase: ParsePhase::AwaitingSources,
            source_count: 0,
            emitted_len: 0,
        }
    }

    pub fn phase(&self) -> ParsePhase {
        self.phase
    }

    /// Consumes one transport chunk and returns the events it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ParseEvent> {
        let mut events = Vec::new();
        if self.phase == ParsePhase::Done {
            return events;
        }
        self.decode(chunk);
        self.process(&mut events);
        events
    }

    /// Signals natural end of stream. Best-effort: flushes the answer and
    /// attempts a final parse of any trailing related-question content,
    /// degrading to an empty list.
    pub fn finish(&mut self) -> Vec<ParseEvent> {
        let mut events = Vec::new();
        match self.phase {
            ParsePhase::Done => return events,
            // Sentinel never arrived: sources stay unknown, nothing fires.
            ParsePhase::AwaitingSources => {}
            ParsePhase::StreamingAnswer => {
                let answer = std::mem::take(&mut self.buf);
                self.emit_answer(&answer, &mut events);
                events.push(ParseEvent::Relates(Vec::new()));
            }
            ParsePhase::AwaitingRelated => {
                let relates =
                    serde_json::from_str::<Vec<String>>(self.buf.trim()).unwrap_or_default();
                events.push(ParseEvent::Relates(relates));
            }
        }
        self.phase = ParsePhase::Done;
        events
    }

    /// Aborts the parse; no events are produced after this, not even from
    /// `finish`.
    pub fn cancel(&mut self) {
        self.phase = ParsePhase::Done;
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.buf.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.pending[..valid]) {
                        self.buf.push_str(text);
                    }
                    match err.error_len() {
                        // Genuinely invalid bytes: drop them and keep going.
                        Some(bad) => {
                            self.pending.drain(..valid + bad);
                        }
                        // Incomplete tail: wait for the next chunk.
                        None => {
                            self.pending.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn process(&mut self, events: &mut Vec<ParseEvent>) {
        loop {
            match self.phase {
                ParsePhase::AwaitingSources => {
                    let Some(at) = self.buf.find(LLM_RESPONSE_SENTINEL) else {
                        return;
                    };
                    let head = self.buf[..at].trim().to_string();
                    self.buf.drain(..at + LLM_RESPONSE_SENTINEL.len());
                    match serde_json::from_str::<Vec<Source>>(&head) {
                        Ok(sources) => {
                            self.source_count = sources.len();
                            events.push(ParseEvent::Sources(sources));
                        }
                        Err(e) => {
                            // Sources stay unknown; the answer still streams.
                            log::warn!("unparseable source section: {e}");
                        }
                    }
                    self.phase = ParsePhase::StreamingAnswer;
                }
                ParsePhase::StreamingAnswer => {
                    if let Some(at) = self.buf.find(RELATED_QUESTIONS_SENTINEL) {
                        let answer = self.buf[..at].to_string();
                        self.buf.drain(..at + RELATED_QUESTIONS_SENTINEL.len());
                        self.emit_answer(&answer, events);
                        self.phase = ParsePhase::AwaitingRelated;
                        continue;
                    }
                    // Withhold anything that could still grow into a
                    // sentinel or a citation marker.
                    let mut safe = self.buf.len()
                        - partial_token_suffix(&self.buf, RELATED_QUESTIONS_SENTINEL);
                    safe -= partial_marker_suffix(&self.buf[..safe]);
                    let visible = self.buf[..safe].to_string();
                    self.emit_answer(&visible, events);
                    return;
                }
                ParsePhase::AwaitingRelated => {
                    let trimmed = self.buf.trim();
                    if !trimmed.is_empty() {
                        if let Ok(relates) = serde_json::from_str::<Vec<String>>(trimmed) {
                            events.push(ParseEvent::Relates(relates));
                            self.phase = ParsePhase::Done;
                        }
                    }
                    return;
                }
                ParsePhase::Done => return,
            }
        }
    }

    fn emit_answer(&mut self, raw: &str, events: &mut Vec<ParseEvent>) {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() <= self.emitted_len {
            return;
        }
        self.emitted_len = trimmed.len();
        events.push(ParseEvent::Answer(rewrite_citations(trimmed, self.source_count)));
    }
}

/// Length of the longest proper prefix of `token` that `buf` ends with.
fn partial_token_suffix(buf: &str, token: &str) -> usize {
    let max = token.len().saturating_sub(1).min(buf.len());
    for len in (1..=max).rev() {
        if buf.ends_with(&token[..len]) {
            return len;
        }
    }
    0
}
