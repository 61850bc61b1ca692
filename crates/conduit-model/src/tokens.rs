// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Local token counting for the OpenAI wire family.
//!
//! Uses tiktoken encodings: `o200k_base` for the 4o/4.1/o-series generation,
//! `cl100k_base` for everything older (and as Perplexity's documented
//! approximation).  Message-list counts include the ChatML per-message
//! overhead: 3 tokens per message plus 3 priming tokens for the reply.

use tiktoken_rs::CoreBPE;

use crate::error::ConduitError;
use crate::message::{ContentBlock, ImageDetail, Message, UserContent};

/// Tokens charged per message for role markers and turn separators.
const TOKENS_PER_MESSAGE: u32 = 3;
/// Tokens charged once per request to prime the assistant's reply.
const REPLY_PRIMING_TOKENS: u32 = 3;

fn encoding_for(model: &str) -> Result<CoreBPE, ConduitError> {
    let enc = if model.starts_with("gpt-4o")
        || model.starts_with("gpt-4.1")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
    {
        tiktoken_rs::o200k_base()
    } else {
        tiktoken_rs::cl100k_base()
    };
    enc.map_err(|e| ConduitError::validation(format!("tokenizer unavailable: {e}")))
}

/// Raw token weight of a string, no overhead.
pub fn count_text(model: &str, text: &str) -> Result<u32, ConduitError> {
    let enc = encoding_for(model)?;
    Ok(enc.encode_with_special_tokens(text).len() as u32)
}

/// Token weight of a message history including per-message overhead.
pub fn count_messages(model: &str, messages: &[Message]) -> Result<u32, ConduitError> {
    let enc = encoding_for(model)?;
    let mut total = REPLY_PRIMING_TOKENS;
    for msg in messages {
        total += TOKENS_PER_MESSAGE;
        total += message_content_tokens(&enc, msg);
    }
    Ok(total)
}

fn message_content_tokens(enc: &CoreBPE, msg: &Message) -> u32 {
    let count = |s: &str| enc.encode_with_special_tokens(s).len() as u32;
    match msg {
        Message::System { content, .. } | Message::Tool { content, .. } => count(content),
        Message::User { content, .. } => match content {
            UserContent::Text(t) => count(t),
            UserContent::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => count(text),
                    // OpenAI's vision pricing: 85 tokens for low detail,
                    // ~765 for a tiled 512x512 region otherwise.
                    ContentBlock::Image { detail, .. } => {
                        if *detail == Some(ImageDetail::Low) { 85 } else { 765 }
                    }
                    ContentBlock::Audio { data, .. } => (data.len() / 4) as u32,
                })
                .sum(),
        },
        Message::Assistant { content, tool_calls, .. } => {
            count(content)
                + tool_calls
                    .iter()
                    .map(|tc| count(&tc.function_name) + count(&tc.arguments_json()))
                    .sum::<u32>()
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_text_is_positive_for_non_empty() {
        let n = count_text("gpt-4o-mini", "Name one mammal.").unwrap();
        assert!(n > 0 && n < 10, "unexpected count: {n}");
    }

    #[test]
    fn count_text_empty_is_zero() {
        assert_eq!(count_text("gpt-4o-mini", "").unwrap(), 0);
    }

    #[test]
    fn message_list_includes_overhead() {
        let text_tokens = count_text("gpt-4o-mini", "hello").unwrap();
        let msgs = vec![Message::user("hello")];
        let total = count_messages("gpt-4o-mini", &msgs).unwrap();
        assert_eq!(total, text_tokens + TOKENS_PER_MESSAGE + REPLY_PRIMING_TOKENS);
    }

    #[test]
    fn more_messages_cost_more_overhead() {
        let one = count_messages("gpt-4o-mini", &[Message::user("x")]).unwrap();
        let two =
            count_messages("gpt-4o-mini", &[Message::user("x"), Message::assistant("x")]).unwrap();
        assert!(two > one);
    }

    #[test]
    fn older_models_use_cl100k() {
        // Both encodings must produce a sane count; exact values differ.
        let a = count_text("gpt-3.5-turbo", "hello world").unwrap();
        let b = count_text("gpt-4o", "hello world").unwrap();
        assert!(a > 0 && b > 0);
    }

    #[test]
    fn image_block_counts_vision_estimate() {
        let msgs = vec![Message::user_with_blocks(vec![
            ContentBlock::text("see"),
            ContentBlock::image_with_detail("data:image/png;base64,A", ImageDetail::Low),
        ])];
        let total = count_messages("gpt-4o", &msgs).unwrap();
        assert!(total >= 85 + TOKENS_PER_MESSAGE + REPLY_PRIMING_TOKENS);
    }
}
