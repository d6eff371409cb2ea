//! Provider error taxonomy, grouped by retry behavior.
//!
//! Mirrors the teacher crate's `ProviderError` (`llm/provider.rs`), widened
//! to the full non-retryable/retryable split the pipeline's retry policy
//! and session loop depend on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limit exceeded for provider {provider}")]
    RateLimitExceeded { provider: String, retry_after: Option<f64> },

    #[error("provider {provider} returned a server error: {message}")]
    ServerError { provider: String, message: String, retry_after: Option<f64> },

    #[error("request to provider {provider} timed out")]
    RequestTimeout { provider: String },

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("authentication failed for provider {provider}")]
    AuthenticationFailed { provider: String },

    #[error("access denied by provider {provider}")]
    AccessDenied { provider: String },

    #[error("resource not found on provider {provider}: {message}")]
    NotFound { provider: String, message: String },

    #[error("invalid request to provider {provider}: {message}")]
    InvalidRequest { provider: String, message: String },

    #[error("context length exceeded for provider {provider}")]
    ContextLengthExceeded { provider: String },

    #[error("content filtered by provider {provider}")]
    ContentFilter { provider: String },

    #[error("quota exceeded for provider {provider}")]
    QuotaExceeded { provider: String },

    #[error("invalid tool call: {0}")]
    InvalidToolCall(String),

    #[error("no object generated: {0}")]
    NoObjectGenerated(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    /// Whether the retry policy should attempt this error again.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimitExceeded { .. }
                | ProviderError::ServerError { .. }
                | ProviderError::RequestTimeout { .. }
                | ProviderError::NetworkError(_)
                | ProviderError::StreamError(_)
        )
    }

    /// Seconds the provider asked us to wait before retrying, if any.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            ProviderError::RateLimitExceeded { retry_after, .. } => *retry_after,
            ProviderError::ServerError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Refine an ambiguous 400/422 response by scanning its message for
/// well-known English substrings. Best-effort and locale-sensitive by
/// construction; callers must not depend on it for correctness (see
/// DESIGN.md Open Question on provider error classification).
pub fn classify_error_message(message: &str) -> Option<&'static str> {
    let msg = message.to_lowercase();
    if msg.contains("not found") || msg.contains("does not exist") {
        return Some("not_found");
    }
    if msg.contains("unauthorized") || msg.contains("invalid key") {
        return Some("authentication");
    }
    if msg.contains("context length") || msg.contains("too many tokens") {
        return Some("context_length");
    }
    if msg.contains("content filter") || msg.contains("safety") {
        return Some("content_filter");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_are_flagged() {
        let e = ProviderError::RateLimitExceeded { provider: "openai".into(), retry_after: None };
        assert!(e.retryable());
        let e = ProviderError::AuthenticationFailed { provider: "openai".into() };
        assert!(!e.retryable());
    }

    #[test]
    fn classify_picks_context_length() {
        assert_eq!(classify_error_message("Context length exceeded for this model"), Some("context_length"));
        assert_eq!(classify_error_message("totally unrelated"), None);
    }
}
