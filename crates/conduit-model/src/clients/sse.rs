// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Minimal server-sent-events framing over a reqwest byte stream.
//!
//! SSE lines can be split across TCP chunks, so a remainder buffer is carried
//! forward; only complete lines (terminated by `\n`) are parsed and whatever
//! is left over is prepended to the next chunk.

use futures::{Stream, StreamExt};

use crate::error::ConduitError;

/// Turn an HTTP response into a stream of `data:` payload strings.
///
/// Comment lines, `event:` lines, and blank keep-alives are dropped; the
/// literal `[DONE]` sentinel is passed through for the caller to interpret.
pub fn data_lines(
    resp: reqwest::Response,
) -> impl Stream<Item = Result<String, ConduitError>> + Send {
    resp.bytes_stream()
        .scan(String::new(), |buf, chunk| {
            let mut out: Vec<Result<String, ConduitError>> = Vec::new();
            match chunk {
                Ok(bytes) => {
                    buf.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(pos) = buf.find('\n') {
                        let line = buf[..pos].trim_end_matches('\r').to_string();
                        buf.drain(..=pos);
                        if let Some(data) = line.strip_prefix("data:") {
                            let data = data.trim();
                            if !data.is_empty() {
                                out.push(Ok(data.to_string()));
                            }
                        }
                    }
                }
                Err(e) => out.push(Err(ConduitError::stream_interrupted(e.to_string()))),
            }
            futures::future::ready(Some(out))
        })
        .flat_map(futures::stream::iter)
}

/// Split already-buffered text the same way [`data_lines`] does.  Used by
/// tests and by providers that receive SSE bodies non-incrementally.
pub fn split_data_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            line.strip_prefix("data:").map(|d| d.trim().to_string())
        })
        .filter(|d| !d.is_empty())
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_extracts_data_payloads() {
        let body = "event: message\ndata: {\"a\":1}\n\ndata: [DONE]\n";
        assert_eq!(split_data_lines(body), vec!["{\"a\":1}", "[DONE]"]);
    }

    #[test]
    fn split_ignores_comments_and_blanks() {
        let body = ": keep-alive\n\ndata: x\n";
        assert_eq!(split_data_lines(body), vec!["x"]);
    }

    #[test]
    fn split_handles_crlf() {
        let body = "data: one\r\ndata: two\r\n";
        assert_eq!(split_data_lines(body), vec!["one", "two"]);
    }

    #[test]
    fn split_tolerates_no_space_after_colon() {
        let body = "data:{\"b\":2}\n";
        assert_eq!(split_data_lines(body), vec!["{\"b\":2}"]);
    }
}
