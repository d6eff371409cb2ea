//! Provider adapter contract: "given a Request, produce a Response or a
//! lazy sequence of stream events." Concrete wire encodings are out of
//! scope; the teacher's own `LLMProvider` trait (`llm/provider.rs`) is the
//! shape this is generalized from.

pub mod client;
pub mod error;
pub mod middleware;
pub mod retry;

#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "anthropic")]
pub mod anthropic;
#[cfg(feature = "gemini")]
pub mod gemini;

pub use client::Client;
pub use error::{classify_error_message, ProviderError};
pub use middleware::{CompleteMiddleware, MiddlewareChain};
pub use retry::RetryPolicy;

use crate::model::{Request, Response, StreamEvent};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// A provider adapter: given a provider-neutral `Request`, produce a
/// `Response` or a stream of `StreamEvent`s. Concrete adapters (openai,
/// anthropic, gemini) implement only this contract; their on-the-wire
/// encoding is not specified further here.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    async fn complete(&self, request: Request) -> Result<Response, ProviderError>;

    async fn stream(&self, request: Request) -> Result<BoxStream<'static, StreamEvent>, ProviderError>;

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
