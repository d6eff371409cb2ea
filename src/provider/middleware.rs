//! Onion-style request/response interception, ported from
//! `attractor_llm.middleware`. The teacher crate has no middleware
//! concept; this is grounded entirely on original_source.

use super::error::ProviderError;
use crate::model::{Request, Response};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

pub type NextFn = dyn Fn(Request) -> BoxFuture<'static, Result<Response, ProviderError>> + Send + Sync;

#[async_trait]
pub trait CompleteMiddleware: Send + Sync {
    async fn handle(&self, request: Request, next: &NextFn) -> Result<Response, ProviderError>;
}

/// Ordered list of interceptors; first-registered is outermost (its
/// "before" runs first, its "after" runs last).
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    complete_mw: Vec<Arc<dyn CompleteMiddleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_middleware(&mut self, mw: Arc<dyn CompleteMiddleware>) {
        self.complete_mw.push(mw);
    }

    /// Apply the chain and invoke `handler`. Built from the inside out: the
    /// last-registered middleware wraps closest to the handler.
    pub async fn apply_complete<F>(&self, request: Request, handler: F) -> Result<Response, ProviderError>
    where
        F: Fn(Request) -> BoxFuture<'static, Result<Response, ProviderError>> + Send + Sync + 'static,
    {
        let mut chain: Arc<NextFn> = Arc::new(handler);
        for mw in self.complete_mw.iter().rev() {
            let mw = mw.clone();
            let next = chain.clone();
            chain = Arc::new(move |req: Request| {
                let mw = mw.clone();
                let next = next.clone();
                Box::pin(async move { mw.handle(req, &*next).await }) as BoxFuture<'static, _>
            });
        }
        chain(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Prefixer(&'static str);

    #[async_trait]
    impl CompleteMiddleware for Prefixer {
        async fn handle(&self, request: Request, next: &NextFn) -> Result<Response, ProviderError> {
            let mut resp = next(request).await?;
            resp.id = format!("{}{}", self.0, resp.id);
            Ok(resp)
        }
    }

    #[tokio::test]
    async fn empty_chain_calls_handler_directly() {
        let chain = MiddlewareChain::new();
        let req = Request::default();
        let resp = chain
            .apply_complete(req, |_| Box::pin(async { Ok(Response::default()) }))
            .await
            .unwrap();
        assert_eq!(resp.id, "");
    }

    #[tokio::test]
    async fn first_registered_middleware_runs_outermost() {
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(Arc::new(Prefixer("a-")));
        chain.use_middleware(Arc::new(Prefixer("b-")));
        let resp = chain
            .apply_complete(Request::default(), |_| {
                Box::pin(async { Ok(Response { id: "base".into(), ..Default::default() }) })
            })
            .await
            .unwrap();
        // b- wraps closest to handler (registered last), so it applies first,
        // then a- wraps that result.
        assert_eq!(resp.id, "a-b-base");
    }
}
