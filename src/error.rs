//! Error types for the loan origination assistant

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, AssistantError>;

#[derive(Error, Debug)]
pub enum AssistantError {

    // =============================
    // Handler Errors (recoverable)
    // =============================

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("KYC name mismatch: '{provided}' does not match the name on the application")]
    KycMismatch { provided: String },

    #[error("Precondition not met: {0}")]
    PreconditionNotMet(String),

    #[error("Application is closed ({0}); no further changes are accepted")]
    ApplicationClosed(String),

    #[error("Tool not found: {0}")]
    UnknownTool(String),

    #[error("Invalid tool input for {tool}: {reason}")]
    InvalidToolInput { tool: String, reason: String },

    // =============================
    // Turn Errors (abort + rollback)
    // =============================

    #[error("Reasoning router error: {0}")]
    RouterError(String),

    #[error("Retrieval error: {0}")]
    RetrievalError(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },

    #[error("Tool chaining exceeded {0} iterations in a single turn")]
    ChainLimitExceeded(u32),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AssistantError {
    /// Recoverable errors are reported back into the conversation as a tool
    /// result; the turn keeps going. Anything else aborts the turn.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AssistantError::InvalidField { .. }
                | AssistantError::MissingPrerequisite(_)
                | AssistantError::KycMismatch { .. }
                | AssistantError::PreconditionNotMet(_)
                | AssistantError::ApplicationClosed(_)
                | AssistantError::UnknownTool(_)
                | AssistantError::InvalidToolInput { .. }
        )
    }

    /// Stable machine-readable code for tool messages and API bodies
    pub fn code(&self) -> &'static str {
        match self {
            AssistantError::InvalidField { .. } => "invalid_field",
            AssistantError::MissingPrerequisite(_) => "missing_prerequisite",
            AssistantError::KycMismatch { .. } => "kyc_mismatch",
            AssistantError::PreconditionNotMet(_) => "precondition_not_met",
            AssistantError::ApplicationClosed(_) => "application_closed",
            AssistantError::UnknownTool(_) => "unknown_tool",
            AssistantError::InvalidToolInput { .. } => "invalid_tool_input",
            AssistantError::RouterError(_) => "router_error",
            AssistantError::RetrievalError(_) => "retrieval_error",
            AssistantError::Timeout { .. } => "timeout",
            AssistantError::ChainLimitExceeded(_) => "chain_limit_exceeded",
            AssistantError::SessionNotFound(_) => "session_not_found",
            AssistantError::ConfigError(_) => "config_error",
            AssistantError::SerializationError(_) => "serialization_error",
            AssistantError::HttpError(_) => "http_error",
            AssistantError::IoError(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_errors_are_recoverable() {
        let kyc = AssistantError::KycMismatch {
            provided: "Jane".to_string(),
        };
        assert!(kyc.is_recoverable());
        assert_eq!(kyc.code(), "kyc_mismatch");
        assert!(AssistantError::PreconditionNotMet("x".into()).is_recoverable());
    }

    #[test]
    fn test_turn_errors_abort() {
        assert!(!AssistantError::ChainLimitExceeded(5).is_recoverable());
        assert!(!AssistantError::RouterError("down".into()).is_recoverable());
        let timeout = AssistantError::Timeout {
            operation: "retrieval",
            seconds: 10,
        };
        assert!(!timeout.is_recoverable());
        assert_eq!(timeout.to_string(), "retrieval timed out after 10s");
    }
}
