use serde::Serialize;
use thiserror::Error;

/// Typed core failures. The wire layer turns each kind into a response code;
/// the core never retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Malformed or out-of-policy input, including capacity overflow.
    #[error("{0}")]
    InvalidArgument(String),
    /// Operation not legal for the entity's current state.
    #[error("{0}")]
    InvalidState(String),
    /// Mutation attempted by someone other than the owner.
    #[error("{0}")]
    AccessDenied(String),
    /// Referenced account or schedule does not exist.
    #[error("{0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidArgument(_) => "INVALID_ARGUMENT",
            EngineError::InvalidState(_) => "INVALID_STATE",
            EngineError::AccessDenied(_) => "ACCESS_DENIED",
            EngineError::NotFound(_) => "NOT_EXIST_RESOURCE",
            EngineError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Internal(format!("journal: {e}"))
    }
}

/// `{code, message}` as surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}
