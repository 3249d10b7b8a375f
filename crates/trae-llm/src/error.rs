//! Error types for model calls

use thiserror::Error;

/// Closed set of failure categories a gateway may report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelErrorKind {
    InvalidRequest,
    Authentication,
    Permission,
    QuotaExceeded,
    RateLimited,
    TransientNetwork,
    Unknown,
}

impl ModelErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelErrorKind::InvalidRequest => "invalid_request",
            ModelErrorKind::Authentication => "authentication_error",
            ModelErrorKind::Permission => "permission_error",
            ModelErrorKind::QuotaExceeded => "quota_exceeded",
            ModelErrorKind::RateLimited => "rate_limited",
            ModelErrorKind::TransientNetwork => "transient_network",
            ModelErrorKind::Unknown => "unknown",
        }
    }

    /// Map an HTTP status code to a kind
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 404 | 413 | 422 => ModelErrorKind::InvalidRequest,
            401 => ModelErrorKind::Authentication,
            402 => ModelErrorKind::QuotaExceeded,
            403 => ModelErrorKind::Permission,
            408 => ModelErrorKind::TransientNetwork,
            429 => ModelErrorKind::RateLimited,
            500..=599 => ModelErrorKind::TransientNetwork,
            _ => ModelErrorKind::Unknown,
        }
    }
}

impl std::fmt::Display for ModelErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages that mark a failure as permanent regardless of its kind
const FATAL_MESSAGE_MARKERS: &[&str] = &["invalid api key", "authentication failed", "permission denied"];

/// Failure reported by a model backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl ModelError {
    pub fn new(kind: ModelErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Default retryability: request, credential, permission and quota
    /// problems are permanent; everything else may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        if matches!(
            self.kind,
            ModelErrorKind::InvalidRequest
                | ModelErrorKind::Authentication
                | ModelErrorKind::Permission
                | ModelErrorKind::QuotaExceeded
        ) {
            return false;
        }

        let lowered = self.message.to_lowercase();
        !FATAL_MESSAGE_MARKERS.iter().any(|m| lowered.contains(m))
    }
}

/// Errors surfaced by any `ModelGateway`
#[derive(Debug, Error)]
pub enum LlmError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("non-retryable error: {0}")]
    NonRetryable(Box<LlmError>),

    #[error("max retries exceeded after {attempts} attempts, last error: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<LlmError>,
    },

    #[error("model call cancelled")]
    Cancelled,
}

impl LlmError {
    /// The underlying backend failure, unwrapping retry wrappers
    pub fn model_error(&self) -> Option<&ModelError> {
        match self {
            LlmError::Model(e) => Some(e),
            LlmError::NonRetryable(inner) => inner.model_error(),
            LlmError::RetryExhausted { last, .. } => last.model_error(),
            LlmError::Cancelled => None,
        }
    }

    pub fn kind(&self) -> Option<ModelErrorKind> {
        self.model_error().map(|e| e.kind)
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            LlmError::Cancelled => true,
            LlmError::NonRetryable(inner) => inner.is_cancelled(),
            _ => false,
        }
    }
}
