// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Incremental scanner over a provider's chunk stream.
//!
//! Accumulates text deltas into a rolling buffer and looks for the first
//! embedded structured payload: a complete `<tag>…</tag>` element or a
//! balanced JSON object.  On a hit with `close_on_match` enabled the upstream
//! connection is closed immediately so no further tokens are paid for.
//!
//! The scan runs over the whole buffer on every chunk arrival, so the result
//! is independent of how the input was chunked — tags straddling chunk
//! boundaries are found exactly as if the input had arrived whole.

use futures::StreamExt;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use conduit_model::{StreamEvent, StreamHandle, StreamUsage};

/// What to look for in the stream.
#[derive(Debug, Clone)]
pub enum MatchMode {
    /// First `<tag>…</tag>` element.  No nesting: the tag must not contain
    /// itself (nested identical tags are undefined behavior).
    Xml { tag: String },
    /// First balanced top-level JSON object, string-escape aware.
    Json,
}

/// Result of draining (or early-terminating) a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    /// Text before the match; the whole buffer when nothing matched.
    pub pre_match_text: String,
    /// The matched payload, verbatim, when one was found.
    pub matched: Option<String>,
    /// Everything accumulated, including the match.
    pub buffer: String,
    /// Usage folded from the provider's usage frames.
    pub usage: StreamUsage,
    /// False when the stream was closed early (match or cancellation).
    pub stream_drained: bool,
}

/// One-shot parser over a [`StreamHandle`].
#[derive(Debug, Clone)]
pub struct StreamParser {
    mode: MatchMode,
    close_on_match: bool,
}

impl StreamParser {
    pub fn xml(tag: impl Into<String>) -> Self {
        Self { mode: MatchMode::Xml { tag: tag.into() }, close_on_match: true }
    }

    pub fn json() -> Self {
        Self { mode: MatchMode::Json, close_on_match: true }
    }

    /// Keep draining the stream after a match instead of closing upstream.
    pub fn keep_stream_open(mut self) -> Self {
        self.close_on_match = false;
        self
    }

    /// Locate the first match in `buffer`.  Returns byte offsets
    /// `(start, end)` of the matched payload.
    pub fn scan(&self, buffer: &str) -> Option<(usize, usize)> {
        match &self.mode {
            MatchMode::Xml { tag } => scan_xml(buffer, tag),
            MatchMode::Json => scan_json(buffer),
        }
    }

    /// Drain the stream, scanning on every chunk.
    ///
    /// Never returns an error: interrupted streams yield whatever was
    /// accumulated, with `stream_drained = false`.
    pub async fn parse(&self, handle: &mut StreamHandle) -> ParseOutcome {
        // A pre-resolved channel makes the cancellable path the only path.
        let (_tx, mut never) = oneshot::channel::<()>();
        self.parse_inner(handle, &mut never).await
    }

    /// Like [`parse`](Self::parse), but stops at the next chunk boundary when
    /// `cancel` resolves (or its sender is dropped... callers that do not
    /// want cancellation should use `parse`).  The stream is closed and the
    /// accumulated buffer returned; cancellation is not an error.
    pub async fn parse_with_cancel(
        &self,
        handle: &mut StreamHandle,
        cancel: &mut oneshot::Receiver<()>,
    ) -> ParseOutcome {
        self.parse_inner(handle, cancel).await
    }

    async fn parse_inner(
        &self,
        handle: &mut StreamHandle,
        cancel: &mut oneshot::Receiver<()>,
    ) -> ParseOutcome {
        let mut buffer = String::new();
        let mut usage = StreamUsage::default();
        let mut found: Option<(usize, usize)> = None;
        let mut drained = false;

        // `parse` passes a channel whose sender is alive for the whole call,
        // so only an actual cancel request resolves the branch.
        loop {
            // The stream borrow must end before `handle.close()` is legal,
            // hence the block around the select.
            let (cancelled, event) = {
                let Some(stream) = handle.stream_mut() else { break };
                tokio::select! {
                    biased;
                    _ = &mut *cancel => (true, None),
                    event = stream.next() => (false, event),
                }
            };
            if cancelled {
                debug!("stream parse cancelled; closing upstream");
                handle.close();
                break;
            }

            match event {
                None => {
                    drained = true;
                    break;
                }
                Some(Ok(StreamEvent::TextDelta(delta))) => {
                    buffer.push_str(&delta);
                    if found.is_none() {
                        if let Some(hit) = self.scan(&buffer) {
                            found = Some(hit);
                            if self.close_on_match {
                                debug!("match found; closing upstream");
                                handle.close();
                                break;
                            }
                        }
                    }
                }
                Some(Ok(StreamEvent::Usage { input_tokens, output_tokens })) => {
                    usage.absorb(input_tokens, output_tokens);
                }
                Some(Ok(StreamEvent::Done)) => {
                    drained = true;
                    break;
                }
                Some(Err(e)) => {
                    // Return what we have rather than losing the buffer.
                    warn!(error = %e, "stream interrupted mid-parse");
                    handle.close();
                    break;
                }
            }
        }

        match found {
            Some((start, end)) => ParseOutcome {
                pre_match_text: buffer[..start].to_string(),
                matched: Some(buffer[start..end].to_string()),
                buffer,
                usage,
                stream_drained: drained,
            },
            None => ParseOutcome {
                pre_match_text: buffer.clone(),
                matched: None,
                buffer,
                usage,
                stream_drained: drained,
            },
        }
    }
}

// ─── Pure scanners ────────────────────────────────────────────────────────────

/// First `<tag>…</tag>` span.  Both the opening and closing tag may straddle
/// chunk boundaries; callers rescan the whole buffer per chunk.
fn scan_xml(buffer: &str, tag: &str) -> Option<(usize, usize)> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = buffer.find(&open)?;
    let close_rel = buffer[start..].find(&close)?;
    Some((start, start + close_rel + close.len()))
}

/// First balanced `{…}` span, skipping braces inside string literals.
fn scan_json(buffer: &str) -> Option<(usize, usize)> {
    let start = buffer.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in buffer[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + i + ch.len_utf8()));
                }
            }
            _ => {}
        }
    }
    None
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_model::{ConduitError, EventStream};

    const TOOL_TAG: &str = "function_calls";

    fn handle_from_chunks(chunks: &[&str]) -> StreamHandle {
        let mut events: Vec<Result<StreamEvent, ConduitError>> = vec![Ok(StreamEvent::Usage {
            input_tokens: 12,
            output_tokens: 0,
        })];
        events.extend(chunks.iter().map(|c| Ok(StreamEvent::TextDelta(c.to_string()))));
        events.push(Ok(StreamEvent::Usage { input_tokens: 0, output_tokens: 7 }));
        events.push(Ok(StreamEvent::Done));
        let stream: EventStream = Box::pin(futures::stream::iter(events));
        StreamHandle::new("mock-model", stream)
    }

    /// Split `text` into chunks of `size` characters.
    fn chunked(text: &str, size: usize) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars.chunks(size).map(|c| c.iter().collect()).collect()
    }

    // ── XML scanning ──────────────────────────────────────────────────────────

    #[test]
    fn scan_xml_finds_complete_element() {
        let parser = StreamParser::xml(TOOL_TAG);
        let text = "pre <function_calls>body</function_calls> post";
        let (s, e) = parser.scan(text).unwrap();
        assert_eq!(&text[s..e], "<function_calls>body</function_calls>");
    }

    #[test]
    fn scan_xml_without_close_tag_is_no_match() {
        let parser = StreamParser::xml(TOOL_TAG);
        assert!(parser.scan("pre <function_calls>half").is_none());
    }

    #[test]
    fn scan_xml_ignores_other_tags() {
        let parser = StreamParser::xml(TOOL_TAG);
        assert!(parser.scan("<other>x</other>").is_none());
    }

    // ── JSON scanning ─────────────────────────────────────────────────────────

    #[test]
    fn scan_json_finds_balanced_object() {
        let parser = StreamParser::json();
        let text = r#"noise {"a": {"b": 1}} tail"#;
        let (s, e) = parser.scan(text).unwrap();
        assert_eq!(&text[s..e], r#"{"a": {"b": 1}}"#);
    }

    #[test]
    fn scan_json_skips_braces_inside_strings() {
        let parser = StreamParser::json();
        let text = r#"{"text": "a } inside"}"#;
        let (s, e) = parser.scan(text).unwrap();
        assert_eq!(&text[s..e], text);
    }

    #[test]
    fn scan_json_handles_escaped_quotes() {
        let parser = StreamParser::json();
        let text = r#"{"text": "quote \" then }"}"#;
        let (s, e) = parser.scan(text).unwrap();
        assert_eq!(&text[s..e], text);
    }

    #[test]
    fn scan_json_incomplete_is_no_match() {
        let parser = StreamParser::json();
        assert!(parser.scan(r#"{"a": {"b": 1}"#).is_none());
    }

    // ── Streaming behavior ────────────────────────────────────────────────────

    #[tokio::test]
    async fn early_termination_on_match() {
        let text = "Thinking... <function_calls><invoke name='x'/></function_calls> and more...";
        let mut handle = handle_from_chunks(&chunked(text, 7).iter().map(String::as_str).collect::<Vec<_>>());
        let outcome = StreamParser::xml(TOOL_TAG).parse(&mut handle).await;
        assert_eq!(outcome.pre_match_text, "Thinking... ");
        assert_eq!(
            outcome.matched.as_deref(),
            Some("<function_calls><invoke name='x'/></function_calls>")
        );
        // The connection was closed before the trailing text was read.
        assert!(handle.is_closed());
        assert!(!outcome.stream_drained);
        assert!(!outcome.buffer.contains("and more"));
    }

    #[tokio::test]
    async fn no_match_returns_full_buffer() {
        let mut handle = handle_from_chunks(&["just ", "plain ", "text"]);
        let outcome = StreamParser::xml(TOOL_TAG).parse(&mut handle).await;
        assert_eq!(outcome.pre_match_text, "just plain text");
        assert!(outcome.matched.is_none());
        assert_eq!(outcome.buffer, "just plain text");
        assert!(outcome.stream_drained);
    }

    #[tokio::test]
    async fn usage_frames_are_absorbed() {
        let mut handle = handle_from_chunks(&["hello"]);
        let outcome = StreamParser::xml(TOOL_TAG).parse(&mut handle).await;
        assert_eq!(outcome.usage.input_tokens, 12);
        assert_eq!(outcome.usage.output_tokens, 7);
    }

    #[tokio::test]
    async fn chunking_does_not_change_the_result() {
        let text = "lead-in <function_calls><invoke name=\"ls\"><parameters><parameter name=\"path\">/tmp</parameter></parameters></invoke></function_calls> trailing";
        let parser = StreamParser::xml(TOOL_TAG).keep_stream_open();
        let mut outcomes = Vec::new();
        for size in [1, 2, 3, 5, 11, 64, text.len()] {
            let chunks = chunked(text, size);
            let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
            let mut handle = handle_from_chunks(&refs);
            let o = parser.parse(&mut handle).await;
            outcomes.push((o.pre_match_text, o.matched, o.buffer));
        }
        for pair in outcomes.windows(2) {
            assert_eq!(pair[0], pair[1], "outcome depends on chunk size");
        }
    }

    #[tokio::test]
    async fn keep_stream_open_drains_past_match() {
        let text = "a <function_calls>x</function_calls> b";
        let chunks = chunked(text, 4);
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let mut handle = handle_from_chunks(&refs);
        let outcome = StreamParser::xml(TOOL_TAG).keep_stream_open().parse(&mut handle).await;
        assert!(outcome.stream_drained);
        assert_eq!(outcome.buffer, text);
        assert_eq!(outcome.matched.as_deref(), Some("<function_calls>x</function_calls>"));
        assert_eq!(outcome.pre_match_text, "a ");
    }

    #[tokio::test]
    async fn stream_error_returns_accumulated_buffer() {
        let events: Vec<Result<StreamEvent, ConduitError>> = vec![
            Ok(StreamEvent::TextDelta("partial ".into())),
            Err(ConduitError::stream_interrupted("connection reset")),
            Ok(StreamEvent::TextDelta("never seen".into())),
        ];
        let stream: EventStream = Box::pin(futures::stream::iter(events));
        let mut handle = StreamHandle::new("m", stream);
        let outcome = StreamParser::json().parse(&mut handle).await;
        assert_eq!(outcome.buffer, "partial ");
        assert!(outcome.matched.is_none());
        assert!(!outcome.stream_drained);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn cancellation_closes_stream_and_returns_buffer() {
        // An endless stream: only cancellation can end the parse.
        let endless: EventStream = Box::pin(futures::stream::unfold(0u64, |n| async move {
            if n == 0 {
                Some((Ok(StreamEvent::TextDelta("head ".into())), 1))
            } else {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                Some((Ok(StreamEvent::TextDelta(".".into())), n + 1))
            }
        }));
        let mut handle = StreamHandle::new("m", endless);
        let (tx, mut rx) = oneshot::channel::<()>();
        let parser = StreamParser::xml(TOOL_TAG);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            let _ = tx.send(());
        });
        let outcome = parser.parse_with_cancel(&mut handle, &mut rx).await;
        assert!(outcome.buffer.starts_with("head "));
        assert!(outcome.matched.is_none());
        assert!(!outcome.stream_drained);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn already_closed_handle_yields_empty_outcome() {
        let stream: EventStream = Box::pin(futures::stream::empty());
        let mut handle = StreamHandle::new("m", stream);
        handle.close();
        let outcome = StreamParser::json().parse(&mut handle).await;
        assert!(outcome.buffer.is_empty());
        assert!(!outcome.stream_drained);
    }
}
