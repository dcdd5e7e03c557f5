use thiserror::Error;

/// Upper bound on how much of an error body is kept for display.
const MAX_ERROR_BODY: usize = 1024;

/// Every failure a provider call can produce.
///
/// Cancellation is deliberately absent: a cancelled call ends without an error.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Connecting, sending or reading the body failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-2xx status.
    #[error("API error (HTTP {status}): {body}")]
    Protocol { status: u16, body: String },

    /// A 2xx payload (or a single stream chunk) did not have the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The response parsed but contained no choices.
    #[error("response contained no choices")]
    EmptyResponse,

    #[error("provider {provider:?} is misconfigured: {reason}")]
    Configuration { provider: String, reason: String },
}

impl ProviderError {
    pub fn protocol(status: u16, body: &str) -> Self {
        Self::Protocol {
            status,
            body: truncate(body.trim(), MAX_ERROR_BODY).to_string(),
        }
    }

    pub fn configuration(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Whether a caller may reasonably try the same request again.
    ///
    /// Only rate limiting (429) and server-side failures (5xx) qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Protocol { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(ProviderError::protocol(429, "slow down").is_retryable());
        assert!(ProviderError::protocol(500, "boom").is_retryable());
        assert!(ProviderError::protocol(503, "").is_retryable());
        assert!(ProviderError::protocol(599, "").is_retryable());

        assert!(!ProviderError::protocol(404, "not found").is_retryable());
        assert!(!ProviderError::protocol(401, "unauthorized").is_retryable());
        assert!(!ProviderError::protocol(600, "").is_retryable());
    }

    #[test]
    fn non_protocol_errors_are_not_retryable() {
        assert!(!ProviderError::Transport("reset".into()).is_retryable());
        assert!(!ProviderError::Decode("bad json".into()).is_retryable());
        assert!(!ProviderError::EmptyResponse.is_retryable());
        assert!(!ProviderError::configuration("x", "missing model").is_retryable());
    }

    #[test]
    fn protocol_body_is_truncated_on_char_boundary() {
        let body = "é".repeat(MAX_ERROR_BODY);
        let ProviderError::Protocol { body, .. } = ProviderError::protocol(500, &body) else {
            panic!("expected protocol error");
        };
        assert!(body.len() <= MAX_ERROR_BODY);
        assert!(body.chars().all(|c| c == 'é'));
    }

    #[test]
    fn display_mentions_status() {
        let err = ProviderError::protocol(502, "  bad gateway\n");
        assert_eq!(err.to_string(), "API error (HTTP 502): bad gateway");
    }
}
