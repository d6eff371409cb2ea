//! Unified client routing requests to provider adapters, ported from
//! `attractor_llm.client.Client`.

use super::error::ProviderError;
use super::middleware::MiddlewareChain;
use super::Provider;
use crate::model::{Request, Response};
use std::collections::HashMap;
use std::sync::Arc;

pub struct Client {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
    middleware: MiddlewareChain,
}

impl Client {
    pub fn new(providers: HashMap<String, Arc<dyn Provider>>, default_provider: Option<String>) -> Result<Self, ProviderError> {
        if providers.is_empty() {
            return Err(ProviderError::ConfigurationError(
                "at least one provider must be configured".into(),
            ));
        }
        let default_provider = match default_provider {
            Some(p) => p,
            None => providers.keys().next().cloned().unwrap(),
        };
        Ok(Client { providers, default_provider, middleware: MiddlewareChain::new() })
    }

    pub fn providers(&self) -> &HashMap<String, Arc<dyn Provider>> {
        &self.providers
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn use_middleware(&mut self, mw: Arc<dyn super::CompleteMiddleware>) {
        self.middleware.use_middleware(mw);
    }

    pub async fn complete(&self, request: Request) -> Result<Response, ProviderError> {
        let adapter = self.resolve_adapter(&request)?;
        self.middleware
            .apply_complete(request, move |req| {
                let adapter = adapter.clone();
                Box::pin(async move { adapter.complete(req).await })
            })
            .await
    }

    fn resolve_adapter(&self, request: &Request) -> Result<Arc<dyn Provider>, ProviderError> {
        let name = request.provider.clone().unwrap_or_else(|| self.default_provider.clone());
        self.providers.get(&name).cloned().ok_or_else(|| {
            ProviderError::ConfigurationError(format!(
                "provider '{}' not configured. available: {:?}",
                name,
                self.providers.keys().collect::<Vec<_>>()
            ))
        })
    }

    pub async fn close(&self) -> Result<(), ProviderError> {
        for adapter in self.providers.values() {
            adapter.close().await?;
        }
        Ok(())
    }
}
