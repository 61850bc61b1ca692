// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ─── Content block types ──────────────────────────────────────────────────────

/// OpenAI vision detail level.
///
/// - `Low` → always 85 tokens regardless of image size; good for logos and
///   small thumbnails where fine detail is not required.
/// - `High` → tile-based token counting; better recognition quality.
/// - `Auto` (the default) → the provider chooses.
///
/// Ignored by Anthropic (an OpenAI-only concept).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    High,
    #[default]
    Auto,
}

/// Encoding of an audio content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
}

impl AudioFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
        }
    }
}

/// A single content block in a multi-part user message.
///
/// Images are represented as data URLs (`data:<mime>;base64,<b64>`) or HTTPS
/// URLs for providers that accept remote references.  Audio is always base64.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        /// Data URL (`data:image/png;base64,...`) or HTTPS URL.
        image_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<ImageDetail>,
    },
    Audio {
        /// Raw base64 payload, no data-URL prefix.
        data: String,
        format: AudioFormat,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(image_url: impl Into<String>) -> Self {
        Self::Image { image_url: image_url.into(), detail: None }
    }

    pub fn image_with_detail(image_url: impl Into<String>, detail: ImageDetail) -> Self {
        Self::Image { image_url: image_url.into(), detail: Some(detail) }
    }

    pub fn audio(data: impl Into<String>, format: AudioFormat) -> Self {
        Self::Audio { data: data.into(), format }
    }
}

// ─── Data URL helpers ─────────────────────────────────────────────────────────

/// Parse a data URL of the form `data:<mime>;base64,<b64>` and return
/// `Ok((mime_type, base64_string))`.  Returns `Err` for non-data-URLs so
/// callers can fall back to treating the string as a plain HTTPS URL.
pub fn parse_data_url_parts(url: &str) -> Result<(String, String), &'static str> {
    let rest = url.strip_prefix("data:").ok_or("not a data URL")?;
    let (meta, b64) = rest.split_once(',').ok_or("malformed data URL")?;
    let mime = meta.strip_suffix(";base64").unwrap_or(meta).to_string();
    Ok((mime, b64.to_string()))
}

// ─── Tool call / result types ─────────────────────────────────────────────────

/// A tool invocation requested by the assistant.
///
/// `arguments` is the parsed argument object.  Providers that serialize
/// arguments as a JSON string (the OpenAI family) are decoded at the adapter
/// boundary so the rest of the pipeline only ever sees structured values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        function_name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self { id: id.into(), function_name: function_name.into(), arguments }
    }

    /// Arguments re-encoded as a JSON string, the OpenAI wire form.
    pub fn arguments_json(&self) -> String {
        Value::Object(self.arguments.clone()).to_string()
    }
}

/// Reference to provider-side audio output attached to an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioRef {
    pub id: String,
}

// ─── Message types ────────────────────────────────────────────────────────────

/// Content of a user message: a plain string for the common case, or a list
/// of typed blocks for multimodal turns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl UserContent {
    /// The concatenated text of this content (block text joined by newlines).
    pub fn text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// A multimodal user message must carry at least one text block.
    pub fn has_text_block(&self) -> bool {
        match self {
            Self::Text(_) => true,
            Self::Blocks(blocks) => blocks
                .iter()
                .any(|b| matches!(b, ContentBlock::Text { .. })),
        }
    }
}

/// A single message in a conversation, tagged by role.
///
/// Serialized with `role` as the tag so wire dumps read the way provider
/// payloads do.  Every message carries a generated id; the conversation's
/// `leaf` pointer refers to these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        #[serde(default = "new_message_id")]
        id: String,
        content: String,
    },
    User {
        #[serde(default = "new_message_id")]
        id: String,
        content: UserContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Assistant {
        #[serde(default = "new_message_id")]
        id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio: Option<AudioRef>,
    },
    Tool {
        #[serde(default = "new_message_id")]
        id: String,
        tool_call_id: String,
        content: String,
    },
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Message role, used where only the discriminant matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { id: new_message_id(), content: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            id: new_message_id(),
            content: UserContent::Text(text.into()),
            name: None,
        }
    }

    /// Construct a multimodal user message.  An empty block list collapses to
    /// empty text; a single text block collapses to the plain-string form.
    pub fn user_with_blocks(blocks: Vec<ContentBlock>) -> Self {
        let content = if blocks.is_empty() {
            UserContent::Text(String::new())
        } else if blocks.len() == 1 {
            if let ContentBlock::Text { text } = &blocks[0] {
                UserContent::Text(text.clone())
            } else {
                UserContent::Blocks(blocks)
            }
        } else {
            UserContent::Blocks(blocks)
        };
        Self::User { id: new_message_id(), content, name: None }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            id: new_message_id(),
            content: text.into(),
            tool_calls: Vec::new(),
            audio: None,
        }
    }

    pub fn assistant_with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            id: new_message_id(),
            content: text.into(),
            tool_calls,
            audio: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            id: new_message_id(),
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::System { id, .. }
            | Self::User { id, .. }
            | Self::Assistant { id, .. }
            | Self::Tool { id, .. } => id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::Tool { .. } => Role::Tool,
        }
    }

    /// The plain text of this message.  Tool messages return their content;
    /// multimodal user messages return the joined text blocks.
    pub fn text(&self) -> String {
        match self {
            Self::System { content, .. } => content.clone(),
            Self::User { content, .. } => content.text(),
            Self::Assistant { content, .. } => content.clone(),
            Self::Tool { content, .. } => content.clone(),
        }
    }

    /// Tool calls pending on this message (empty for non-assistant roles).
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Collect all image URLs present in this message.
    pub fn image_urls(&self) -> Vec<&str> {
        match self {
            Self::User { content: UserContent::Blocks(blocks), .. } => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Image { image_url, .. } => Some(image_url.as_str()),
                    _ => None,
                })
                .collect(),
            _ => vec![],
        }
    }

    /// True when the message carries an audio block or audio output reference.
    pub fn has_audio(&self) -> bool {
        match self {
            Self::User { content: UserContent::Blocks(blocks), .. } => blocks
                .iter()
                .any(|b| matches!(b, ContentBlock::Audio { .. })),
            Self::Assistant { audio, .. } => audio.is_some(),
            _ => false,
        }
    }

    /// Approximate token count used for history pruning decisions.
    ///
    /// Uses a 4-chars-per-token heuristic for text.  Images use OpenAI's
    /// estimates: 85 tokens for `detail = low`, 765 otherwise.
    pub fn approx_tokens(&self) -> usize {
        let chars = match self {
            Self::System { content, .. } | Self::Tool { content, .. } => content.len(),
            Self::User { content, .. } => match content {
                UserContent::Text(t) => t.len(),
                UserContent::Blocks(blocks) => blocks
                    .iter()
                    .map(|b| match b {
                        ContentBlock::Text { text } => text.len(),
                        ContentBlock::Image { detail, .. } => {
                            let tokens =
                                if *detail == Some(ImageDetail::Low) { 85 } else { 765 };
                            tokens * 4
                        }
                        ContentBlock::Audio { data, .. } => data.len() / 4,
                    })
                    .sum(),
            },
            Self::Assistant { content, tool_calls, .. } => {
                content.len()
                    + tool_calls
                        .iter()
                        .map(|tc| tc.function_name.len() + tc.arguments_json().len())
                        .sum::<usize>()
            }
        };
        (chars / 4).max(1)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    // ── Construction ─────────────────────────────────────────────────────────

    #[test]
    fn user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role(), Role::User);
        assert_eq!(m.text(), "hello");
    }

    #[test]
    fn assistant_starts_with_no_tool_calls() {
        let m = Message::assistant("reply");
        assert_eq!(m.role(), Role::Assistant);
        assert!(m.tool_calls().is_empty());
    }

    #[test]
    fn tool_result_carries_call_id() {
        let m = Message::tool_result("call-1", "output");
        assert_eq!(m.role(), Role::Tool);
        match &m {
            Message::Tool { tool_call_id, content, .. } => {
                assert_eq!(tool_call_id, "call-1");
                assert_eq!(content, "output");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn messages_get_unique_ids() {
        let a = Message::user("x");
        let b = Message::user("x");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn user_with_blocks_single_text_collapses() {
        let m = Message::user_with_blocks(vec![ContentBlock::text("hi")]);
        match &m {
            Message::User { content: UserContent::Text(t), .. } => assert_eq!(t, "hi"),
            _ => panic!("expected collapsed text content"),
        }
    }

    #[test]
    fn user_with_blocks_keeps_multimodal_list() {
        let m = Message::user_with_blocks(vec![
            ContentBlock::text("what is this?"),
            ContentBlock::image("data:image/png;base64,XYZ"),
        ]);
        assert_eq!(m.image_urls(), vec!["data:image/png;base64,XYZ"]);
        assert_eq!(m.text(), "what is this?");
    }

    #[test]
    fn has_audio_detects_audio_block() {
        let m = Message::user_with_blocks(vec![
            ContentBlock::text("transcribe"),
            ContentBlock::audio("QUJD", AudioFormat::Mp3),
        ]);
        assert!(m.has_audio());
        assert!(!Message::user("plain").has_audio());
    }

    #[test]
    fn user_content_has_text_block() {
        let with = UserContent::Blocks(vec![ContentBlock::text("t"), ContentBlock::image("u")]);
        let without = UserContent::Blocks(vec![ContentBlock::image("u")]);
        assert!(with.has_text_block());
        assert!(!without.has_text_block());
    }

    // ── Tool calls ────────────────────────────────────────────────────────────

    #[test]
    fn tool_call_arguments_json_is_object() {
        let tc = ToolCall::new("id-1", "ls", args(&[("path", json!("/tmp"))]));
        assert_eq!(tc.arguments_json(), r#"{"path":"/tmp"}"#);
    }

    #[test]
    fn assistant_with_tool_calls_reports_them() {
        let tc = ToolCall::new("id-1", "ls", Map::new());
        let m = Message::assistant_with_tool_calls("", vec![tc]);
        assert_eq!(m.tool_calls().len(), 1);
        assert_eq!(m.tool_calls()[0].function_name, "ls");
    }

    // ── Token approximation ───────────────────────────────────────────────────

    #[test]
    fn approx_tokens_text_divides_by_four() {
        assert_eq!(Message::user("12345678").approx_tokens(), 2);
    }

    #[test]
    fn approx_tokens_minimum_is_one() {
        assert_eq!(Message::user("").approx_tokens(), 1);
    }

    #[test]
    fn approx_tokens_image_low_detail_uses_85() {
        let m = Message::user_with_blocks(vec![ContentBlock::image_with_detail(
            "data:image/png;base64,A",
            ImageDetail::Low,
        )]);
        assert_eq!(m.approx_tokens(), 85);
    }

    #[test]
    fn approx_tokens_image_default_uses_765() {
        let m = Message::user_with_blocks(vec![ContentBlock::image("data:image/png;base64,A")]);
        assert_eq!(m.approx_tokens(), 765);
    }

    // ── Data URLs ─────────────────────────────────────────────────────────────

    #[test]
    fn parse_data_url_splits_mime_and_payload() {
        let (mime, b64) = parse_data_url_parts("data:image/png;base64,iVBORw0KGgo=").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(b64, "iVBORw0KGgo=");
    }

    #[test]
    fn parse_data_url_rejects_https() {
        assert!(parse_data_url_parts("https://example.com/a.png").is_err());
    }

    // ── Serialization ─────────────────────────────────────────────────────────

    #[test]
    fn message_round_trips_with_role_tag() {
        let m = Message::user("payload");
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains(r#""role":"user""#));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn assistant_without_tool_calls_omits_field() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn message_deserializes_without_id_field() {
        // Wire payloads from providers never carry our ids.
        let json = r#"{"role":"assistant","content":"hello"}"#;
        let m: Message = serde_json::from_str(json).unwrap();
        assert_eq!(m.role(), Role::Assistant);
        assert!(!m.id().is_empty());
    }

    #[test]
    fn image_detail_omitted_when_none() {
        let json = serde_json::to_string(&ContentBlock::image("u")).unwrap();
        assert!(!json.contains("detail"));
        let with = serde_json::to_string(&ContentBlock::image_with_detail(
            "u",
            ImageDetail::Low,
        ))
        .unwrap();
        assert!(with.contains(r#""detail":"low""#));
    }
}
