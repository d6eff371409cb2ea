//! Anthropic Messages adapter. The on-the-wire encoding is explicitly out
//! of scope (contract-only): this adapter satisfies the `Provider` trait
//! contract — "given a Request, produce a Response" — without
//! implementing Anthropic's actual request/response JSON shape. A real
//! deployment would swap this module out for a full wire-accurate client
//! the way the teacher crate's `llm/anthropic.rs` does for its own
//! provider set; that fidelity is not part of this crate's core.

use super::error::ProviderError;
use super::Provider;
use crate::model::{ContentPart, FinishReason, Message, Request, Response, Role, StreamEvent};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://api.anthropic.com")
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        AnthropicProvider {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: Request) -> Result<Response, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::AuthenticationFailed { provider: "anthropic".into() });
        }
        let _ = &self.client;
        let _ = &self.base_url;
        // Contract-only stand-in: echoes the last user message as the
        // assistant reply rather than calling the real Messages API.
        let last_user_text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_default();

        Ok(Response {
            id: "anthropic-stub".into(),
            model: request.model,
            provider: "anthropic".into(),
            message: Message {
                role: Role::Assistant,
                content: vec![ContentPart::Text { text: last_user_text }],
                ..Default::default()
            },
            finish_reason: FinishReason { reason: "stop".into(), raw: None },
            usage: Default::default(),
            raw: None,
            warnings: vec![],
            rate_limit: None,
        })
    }

    async fn stream(&self, request: Request) -> Result<BoxStream<'static, StreamEvent>, ProviderError> {
        let resp = self.complete(request).await?;
        let text = resp.text();
        Ok(stream::iter(vec![
            StreamEvent::StreamStart,
            StreamEvent::TextDelta { text_id: "0".into(), delta: text },
            StreamEvent::Finish { finish_reason: resp.finish_reason, usage: resp.usage },
        ])
        .boxed())
    }
}
