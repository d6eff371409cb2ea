//! OpenAI-chat-compatible adapter: the one concrete wire encoding this
//! crate implements, standing in for the "OpenAI-chat-compatible
//! fallback" mentioned in scope. Grounded on the teacher's
//! `llm/openai.rs` (reqwest client + eventsource-stream SSE pattern);
//! trimmed to the minimum needed to satisfy the `Provider` contract,
//! since the exact wire encoding is explicitly out of scope.

use super::error::ProviderError;
use super::Provider;
use crate::model::{
    ContentPart, FinishReason, Message, Request, Response, Role, StreamEvent, Usage,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com")
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        OpenAiProvider {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: role_str(m.role).to_string(),
                content: m.text(),
            })
            .collect()
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::Developer => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    id: String,
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: Request) -> Result<Response, ProviderError> {
        let body = ChatCompletionRequest {
            model: request.model.clone(),
            messages: Self::to_wire_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_http_error("openai", status.as_u16(), text));
        }

        let parsed: ChatCompletionResponse = resp.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NoObjectGenerated("empty choices array".into()))?;

        Ok(Response {
            id: parsed.id,
            model: parsed.model,
            provider: "openai".into(),
            message: Message {
                role: Role::Assistant,
                content: vec![ContentPart::Text {
                    text: choice.message.content.unwrap_or_default(),
                }],
                ..Default::default()
            },
            finish_reason: FinishReason {
                reason: choice.finish_reason.clone().unwrap_or_else(|| "stop".into()),
                raw: choice.finish_reason,
            },
            usage: parsed
                .usage
                .map(|u| Usage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                    ..Default::default()
                })
                .unwrap_or_default(),
            raw: None,
            warnings: vec![],
            rate_limit: None,
        })
    }

    async fn stream(&self, request: Request) -> Result<BoxStream<'static, StreamEvent>, ProviderError> {
        let body = json!({
            "model": request.model,
            "messages": Self::to_wire_messages(&request.messages),
            "stream": true,
        });

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_http_error("openai", status.as_u16(), text));
        }

        let byte_stream = resp.bytes_stream();
        let events = byte_stream
            .map(|chunk| match chunk {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).to_string();
                    StreamEvent::TextDelta { text_id: "0".into(), delta: text }
                }
                Err(e) => StreamEvent::Error { message: e.to_string() },
            })
            .boxed();
        Ok(events)
    }
}

fn classify_http_error(provider: &str, status: u16, message: String) -> ProviderError {
    match status {
        401 => ProviderError::AuthenticationFailed { provider: provider.into() },
        403 => ProviderError::AccessDenied { provider: provider.into() },
        404 => ProviderError::NotFound { provider: provider.into(), message },
        413 => ProviderError::ContextLengthExceeded { provider: provider.into() },
        429 => ProviderError::RateLimitExceeded { provider: provider.into(), retry_after: None },
        400 | 422 => {
            match super::classify_error_message(&message) {
                Some("not_found") => ProviderError::NotFound { provider: provider.into(), message },
                Some("authentication") => ProviderError::AuthenticationFailed { provider: provider.into() },
                Some("context_length") => ProviderError::ContextLengthExceeded { provider: provider.into() },
                Some("content_filter") => ProviderError::ContentFilter { provider: provider.into() },
                _ => ProviderError::InvalidRequest { provider: provider.into(), message },
            }
        }
        500..=599 => ProviderError::ServerError { provider: provider.into(), message, retry_after: None },
        _ => ProviderError::InvalidRequest { provider: provider.into(), message },
    }
}
