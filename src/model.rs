//! Provider-neutral conversation data model: messages, content parts,
//! requests/responses, usage accounting, and streaming events.
//!
//! Every type here is the wire-independent contract between the session
//! loop and a provider adapter; none of it encodes any particular
//! provider's JSON shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageData {
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    pub media_type: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioData {
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentData {
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    pub media_type: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, Value>,
    /// Raw (unparsed) argument string, kept when a provider streams
    /// arguments incrementally and they don't parse as JSON yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_arguments: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Json(Value),
}

impl Default for ToolResultContent {
    fn default() -> Self {
        ToolResultContent::Text(String::new())
    }
}

impl ToolResultContent {
    pub fn as_text(&self) -> String {
        match self {
            ToolResultContent::Text(s) => s.clone(),
            ToolResultContent::Json(v) => v.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: ToolResultContent,
    pub is_error: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThinkingData {
    pub text: String,
    pub signature: Option<String>,
    #[serde(default)]
    pub redacted: bool,
}

/// Exactly one payload populated per tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { image: ImageData },
    Audio { audio: AudioData },
    Document { document: DocumentData },
    ToolCall { tool_call: ToolCall },
    ToolResult { tool_result: ToolResult },
    Thinking { thinking: ThinkingData },
    RedactedThinking { thinking: ThinkingData },
}

impl ContentPart {
    pub fn text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::Text { text: text.into() }],
            ..Default::default()
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::Text { text: text.into() }],
            ..Default::default()
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::Text { text: text.into() }],
            ..Default::default()
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        let tool_call_id = tool_call_id.into();
        Self {
            role: Role::Tool,
            content: vec![ContentPart::ToolResult {
                tool_result: ToolResult {
                    tool_call_id: tool_call_id.clone(),
                    content: ToolResultContent::Text(content.into()),
                    is_error,
                },
            }],
            tool_call_id: Some(tool_call_id),
            ..Default::default()
        }
    }

    /// Concatenation of every text content part, in order.
    pub fn text(&self) -> String {
        self.content.iter().filter_map(|p| p.text()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoiceMode {
    Auto,
    None,
    Required,
}

#[derive(Debug, Clone)]
pub struct ToolChoice {
    pub mode: ToolChoiceMode,
    pub tool_name: Option<String>,
}

impl Default for ToolChoice {
    fn default() -> Self {
        ToolChoice {
            mode: ToolChoiceMode::Auto,
            tool_name: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseFormat {
    pub kind: String,
    pub json_schema: Option<Value>,
    pub strict: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub model: String,
    pub messages: Vec<Message>,
    pub provider: Option<String>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<ToolChoice>,
    pub response_format: Option<ResponseFormat>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    pub reasoning_effort: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
    pub provider_options: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinishReason {
    pub reason: String,
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub reasoning_tokens: Option<u64>,
    pub cache_read_tokens: Option<u64>,
    pub cache_write_tokens: Option<u64>,
}

fn add_optional(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}

impl std::ops::Add for Usage {
    type Output = Usage;
    fn add(self, other: Usage) -> Usage {
        Usage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
            reasoning_tokens: add_optional(self.reasoning_tokens, other.reasoning_tokens),
            cache_read_tokens: add_optional(self.cache_read_tokens, other.cache_read_tokens),
            cache_write_tokens: add_optional(self.cache_write_tokens, other.cache_write_tokens),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Warning {
    pub message: String,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RateLimitInfo {
    pub requests_remaining: Option<u64>,
    pub requests_limit: Option<u64>,
    pub tokens_remaining: Option<u64>,
    pub tokens_limit: Option<u64>,
    pub reset_at: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub provider: String,
    pub message: Message,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub raw: Option<Value>,
    pub warnings: Vec<Warning>,
    pub rate_limit: Option<RateLimitInfo>,
}

impl Response {
    pub fn text(&self) -> String {
        self.message.text()
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.message
            .content
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall { tool_call } => Some(tool_call.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reasoning(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .message
            .content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Thinking { thinking } if !thinking.text.is_empty() => {
                    Some(thinking.text.as_str())
                }
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.concat())
        }
    }
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    StreamStart,
    TextStart { text_id: String },
    TextDelta { text_id: String, delta: String },
    TextEnd { text_id: String },
    ReasoningStart,
    ReasoningDelta { delta: String },
    ReasoningEnd,
    ToolCallStart { tool_call: ToolCall },
    ToolCallDelta { id: String, delta: String },
    ToolCallEnd { tool_call: ToolCall },
    Finish { finish_reason: FinishReason, usage: Usage },
    Error { message: String },
    ProviderEvent { raw: Value },
}

/// Folds a sequence of `StreamEvent`s into the `Response` that a
/// non-streaming `complete()` call would have produced for the same
/// request. Guarantees `response.text() == concatenation of all
/// TextDelta payloads in order`.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    reasoning: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: FinishReason,
    usage: Usage,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { delta, .. } => self.text.push_str(delta),
            StreamEvent::ReasoningDelta { delta } => self.reasoning.push_str(delta),
            StreamEvent::ToolCallEnd { tool_call } => self.tool_calls.push(tool_call.clone()),
            StreamEvent::Finish { finish_reason, usage } => {
                self.finish_reason = finish_reason.clone();
                self.usage = *usage;
            }
            _ => {}
        }
    }

    pub fn finish(self, id: String, model: String, provider: String) -> Response {
        let mut content = vec![ContentPart::Text { text: self.text }];
        if !self.reasoning.is_empty() {
            content.push(ContentPart::Thinking {
                thinking: ThinkingData {
                    text: self.reasoning,
                    signature: None,
                    redacted: false,
                },
            });
        }
        for tc in self.tool_calls {
            content.push(ContentPart::ToolCall { tool_call: tc });
        }
        Response {
            id,
            model,
            provider,
            message: Message {
                role: Role::Assistant,
                content,
                ..Default::default()
            },
            finish_reason: self.finish_reason,
            usage: self.usage,
            raw: None,
            warnings: vec![],
            rate_limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_addition_is_associative() {
        let a = Usage { input_tokens: 1, output_tokens: 2, total_tokens: 3, ..Default::default() };
        let b = Usage { input_tokens: 10, output_tokens: 20, total_tokens: 30, reasoning_tokens: Some(5), ..Default::default() };
        let c = Usage { input_tokens: 100, output_tokens: 200, total_tokens: 300, ..Default::default() };

        let left = (a + b) + c;
        let right = a + (b + c);
        assert_eq!(left.input_tokens, right.input_tokens);
        assert_eq!(left.output_tokens, right.output_tokens);
        assert_eq!(left.total_tokens, right.total_tokens);
        assert_eq!(left.reasoning_tokens, right.reasoning_tokens);
    }

    #[test]
    fn usage_plus_default_is_identity() {
        let u = Usage { input_tokens: 7, output_tokens: 8, total_tokens: 15, ..Default::default() };
        assert_eq!((u + Usage::default()).total_tokens, u.total_tokens);
    }

    #[test]
    fn usage_none_plus_none_stays_none() {
        let a = Usage::default();
        let b = Usage::default();
        assert_eq!((a + b).reasoning_tokens, None);
    }

    #[test]
    fn message_text_concatenates_text_parts() {
        let m = Message::user("hello");
        assert_eq!(m.text(), "hello");
    }

    #[test]
    fn stream_accumulator_matches_concatenated_deltas() {
        let mut acc = StreamAccumulator::new();
        acc.push(&StreamEvent::TextDelta { text_id: "1".into(), delta: "Hel".into() });
        acc.push(&StreamEvent::TextDelta { text_id: "1".into(), delta: "lo".into() });
        let resp = acc.finish("id".into(), "model".into(), "provider".into());
        assert_eq!(resp.text(), "Hello");
    }
}
