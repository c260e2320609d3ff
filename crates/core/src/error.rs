//! Error taxonomy for the analysis core.
//!
//! Layer-local failures are captured into per-layer diagnostics and never
//! propagate; only hard errors (invalid request, total timeout, overload)
//! surface to the caller.

use crate::types::LayerId;

/// Core error type.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed arguments or missing required fields.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Symbol, pattern, concept, or snapshot absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stage or total budget exceeded.
    #[error("{}", timeout_message(.stage))]
    Timeout { stage: Option<LayerId> },

    /// All enabled layers circuit-open, or the request queue is full.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The request was cancelled by its caller.
    #[error("Cancelled")]
    Cancelled,

    /// Layer-local parse failure, recovered by fallback.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Database error.
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Recoverable errors are flagged so clients may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Timeout { .. } | CoreError::ServiceUnavailable(_))
    }

    /// Hard errors fail the request even when a layer produced partial data.
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidRequest(_)
                | CoreError::ServiceUnavailable(_)
                | CoreError::Cancelled
        )
    }
}

fn timeout_message(stage: &Option<LayerId>) -> String {
    match stage {
        Some(layer) => format!("Timed out in {}", layer.label()),
        None => "Timed out".to_string(),
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CoreError::Timeout { stage: None }.is_retryable());
        assert!(CoreError::ServiceUnavailable("full".into()).is_retryable());
        assert!(!CoreError::InvalidRequest("bad".into()).is_retryable());
        assert!(!CoreError::Cancelled.is_retryable());
    }

    #[test]
    fn hard_classification() {
        assert!(CoreError::InvalidRequest("bad".into()).is_hard());
        assert!(CoreError::Cancelled.is_hard());
        assert!(!CoreError::Parse("x".into()).is_hard());
        assert!(!CoreError::Timeout { stage: Some(LayerId::L2) }.is_hard());
    }

    #[test]
    fn timeout_message_names_stage() {
        let e = CoreError::Timeout { stage: Some(LayerId::L2) };
        assert!(e.to_string().contains("ast"));
        let e = CoreError::Timeout { stage: None };
        assert_eq!(e.to_string(), "Timed out");
    }
}
