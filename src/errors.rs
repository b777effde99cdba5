use thiserror::Error;

/// Top-level application error.
/// All variants carry a human-readable message for display/logging; the
/// `Display` text of a completion failure is what ends up in the chat bubble.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Configuration errors ─────────────────────────────────────────────────
    #[error("Missing required setting '{key}'")]
    MissingConfig { key: String },

    #[error("Invalid value '{value}' for setting '{key}': {reason}")]
    InvalidConfig { key: String, value: String, reason: String },

    // ── Completion service errors ────────────────────────────────────────────
    #[error("Gemini service unavailable at {host}")]
    ServiceUnavailable { host: String },

    #[error("Model '{model_name}' not found")]
    ModelNotFound { model_name: String },

    #[error("Inference error: {message}")]
    InferenceError { message: String },

    #[error("No response text")]
    EmptyResponse,

    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Request cancelled")]
    Cancelled,

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn invalid_config(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        AppError::InvalidConfig { key: key.into(), value: value.into(), reason: reason.into() }
    }

    /// Failures reported by, or on the way to, the completion service.
    /// Anything else reaching a request is a bug on our side.
    pub fn is_service_failure(&self) -> bool {
        matches!(
            self,
            AppError::ServiceUnavailable { .. }
                | AppError::ModelNotFound { .. }
                | AppError::InferenceError { .. }
                | AppError::EmptyResponse
                | AppError::Timeout { .. }
        )
    }
}
