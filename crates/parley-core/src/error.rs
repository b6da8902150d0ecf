//! Router error taxonomy

use thiserror::Error;

/// Failures the router reports back to clients as `error` events
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("Invalid target: {0}. Use @gpt or @claude")]
    InvalidTarget(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Missing session_id or goal for collaboration")]
    MissingCollaborationFields,

    #[error("Session {0} is already active")]
    SessionActive(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RouterError::InvalidTarget("bard".to_string()).to_string(),
            "Invalid target: bard. Use @gpt or @claude"
        );
        assert_eq!(RouterError::UnknownAgent("x".to_string()).to_string(), "Unknown agent: x");
    }
}
