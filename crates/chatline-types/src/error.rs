use thiserror::Error;
use uuid::Uuid;

/// Errors from message store operations (used by the `MessageStore` trait in
/// chatline-core).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Errors from topic broadcaster operations.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcaster unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the session coordinator and client reconciler.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("broadcast unavailable: {0}")]
    BroadcastUnavailable(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("message {message_id} cannot be placed consistently with the local transcript")]
    ReconciliationMismatch { message_id: Uuid },
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        ChatError::StorageUnavailable(err.to_string())
    }
}

impl From<BroadcastError> for ChatError {
    fn from(err: BroadcastError) -> Self {
        ChatError::BroadcastUnavailable(err.to_string())
    }
}

impl From<crate::llm::LlmError> for ChatError {
    fn from(err: crate::llm::LlmError) -> Self {
        ChatError::GenerationFailed(err.to_string())
    }
}

/// Errors from loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("environment variable {0} is not set")]
    MissingEnv(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    #[test]
    fn test_store_error_maps_to_storage_unavailable() {
        let err: ChatError = StoreError::Connection("database is locked".to_string()).into();
        assert!(matches!(err, ChatError::StorageUnavailable(_)));
        assert!(err.to_string().contains("database is locked"));
    }

    #[test]
    fn test_llm_error_maps_to_generation_failed() {
        let err: ChatError = LlmError::AuthenticationFailed.into();
        assert!(matches!(err, ChatError::GenerationFailed(_)));
    }

    #[test]
    fn test_mismatch_display_names_message() {
        let id = Uuid::now_v7();
        let err = ChatError::ReconciliationMismatch { message_id: id };
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingEnv("OPENAI_API_KEY".to_string());
        assert_eq!(err.to_string(), "environment variable OPENAI_API_KEY is not set");
    }
}
