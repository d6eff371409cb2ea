//! Gemini generateContent adapter. Like `anthropic.rs`, wire fidelity is
//! out of scope; this satisfies the `Provider` contract only.

use super::error::ProviderError;
use super::Provider;
use crate::model::{ContentPart, FinishReason, Message, Request, Response, Role, StreamEvent};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://generativelanguage.googleapis.com")
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        GeminiProvider {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn id(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: Request) -> Result<Response, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::AuthenticationFailed { provider: "gemini".into() });
        }
        let _ = &self.client;
        let _ = &self.base_url;
        let last_user_text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_default();

        Ok(Response {
            id: "gemini-stub".into(),
            model: request.model,
            provider: "gemini".into(),
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
