//! Proxy-related errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors the proxy reports to clients as `application/problem+json`.
///
/// The `Display` text doubles as the problem `detail`; [`ProxyError::title`]
/// is the short problem `title`.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ProxyError {
    /// Request body exceeded the configured cap
    #[error("request body too large (limit {limit} bytes)")]
    BodyTooLarge { limit: usize },

    /// Malformed path, body or URL
    #[error("{message}")]
    BadRequest { message: String },

    /// No adapter is mounted for the request path
    #[error("no adapter for path {path}")]
    NoAdapter { path: String },

    /// Adapter could not resolve a route for the model
    #[error("unknown model {model:?} and no default route")]
    UnknownModel { model: String },

    /// A route was found but lacks base URL, deployment or API version
    #[error("route incomplete for model {model:?}")]
    RouteIncomplete { model: String },

    /// Any credential failure; deliberately carries no detail
    #[error("unauthorized")]
    Unauthorized,

    /// An application policy rejected the request
    #[error("policy {policy} rejected the request: {reason}")]
    PolicyViolation { policy: String, reason: String },

    /// Caller exceeded its rate limit
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Upstream could not be reached or the exchange failed before a response
    #[error("upstream request failed: {message}")]
    UpstreamFailed { message: String },

    /// Unexpected fault inside the proxy (recovered panic, etc)
    #[error("internal server error")]
    Internal,
}

impl ProxyError {
    /// Get HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::BodyTooLarge { .. }
            | Self::BadRequest { .. }
            | Self::NoAdapter { .. }
            | Self::UnknownModel { .. }
            | Self::RouteIncomplete { .. } => 400,
            Self::Unauthorized => 401,
            Self::RateLimited { .. } | Self::PolicyViolation { .. } => 429,
            Self::UpstreamFailed { .. } => 502,
            Self::Internal => 500,
        }
    }

    /// Problem `title` for this error.
    pub fn title(&self) -> &'static str {
        match self {
            Self::BodyTooLarge { .. } => "too-large",
            Self::BadRequest { .. } | Self::NoAdapter { .. } => "bad-request",
            Self::UnknownModel { .. } | Self::RouteIncomplete { .. } => "bad-request",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited { .. } => "too-many-requests",
            Self::PolicyViolation { .. } => "policy-violation",
            Self::UpstreamFailed { .. } => "bad-gateway",
            Self::Internal => "internal-server-error",
        }
    }

    /// Whether the problem body should carry a `detail` member.
    ///
    /// Credential, throttling and internal failures answer with the bare
    /// `{title, status}` shape so callers cannot tell failure causes apart.
    pub fn has_detail(&self) -> bool {
        !matches!(self, Self::Unauthorized | Self::RateLimited { .. } | Self::Internal)
    }

    /// Check if this is a client error (4xx equivalent).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_codes() {
        assert_eq!(ProxyError::RateLimited { retry_after_secs: None }.http_status_code(), 429);
        assert_eq!(ProxyError::BodyTooLarge { limit: 10 }.http_status_code(), 400);
        assert_eq!(ProxyError::UnknownModel { model: "x".to_string() }.http_status_code(), 400);
        assert_eq!(
            ProxyError::UpstreamFailed { message: "refused".to_string() }.http_status_code(),
            502
        );
        assert_eq!(ProxyError::Unauthorized.http_status_code(), 401);
    }

    #[test]
    fn test_policy_violation_problem() {
        let err = ProxyError::PolicyViolation {
            policy: "model-allowlist".to_string(),
            reason: "model gpt-4o is not allowed".to_string(),
        };
        assert_eq!(err.http_status_code(), 429);
        assert_eq!(err.title(), "policy-violation");
        assert!(err.has_detail());
        assert!(err.to_string().contains("model-allowlist"));
    }

    #[test]
    fn test_titles_are_kebab_case() {
        let errors = [
            ProxyError::BodyTooLarge { limit: 1 },
            ProxyError::BadRequest { message: "x".to_string() },
            ProxyError::Unauthorized,
            ProxyError::RateLimited { retry_after_secs: None },
            ProxyError::UpstreamFailed { message: "x".to_string() },
            ProxyError::Internal,
        ];
        for err in &errors {
            let title = err.title();
            assert!(
                title.chars().all(|c| c.is_ascii_lowercase() || c == '-'),
                "{title} is not kebab-case"
            );
        }
        assert_eq!(ProxyError::Unauthorized.title(), "unauthorized");
    }

    #[test]
    fn test_unknown_model_message() {
        let err = ProxyError::UnknownModel { model: "nope".to_string() };
        assert_eq!(err.to_string(), "unknown model \"nope\" and no default route");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_uniform_errors_have_no_detail() {
        assert!(!ProxyError::Unauthorized.has_detail());
        assert!(!ProxyError::Internal.has_detail());
        assert!(ProxyError::BodyTooLarge { limit: 1 }.has_detail());
    }
}
