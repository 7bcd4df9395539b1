//! Error types, split by layer.

use thiserror::Error;

use crate::rpc::frame::RpcErrorCode;

/// Errors surfaced by the RPC layer.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("not connected to the central system")]
    NotConnected,

    #[error("call timed out")]
    Timeout,

    #[error("transport failure: {0}")]
    Transport(String),

    /// The peer answered with a CALLERROR frame.
    #[error("call error {code}: {description}")]
    Call {
        code: RpcErrorCode,
        description: String,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The in-flight call was dropped (shutdown or connection teardown).
    #[error("call aborted")]
    Aborted,
}

impl RpcError {
    /// Whether the failed call may succeed if sent again.
    ///
    /// Schema and constraint violations are permanent: the same payload will
    /// fail the same way, so the transaction FIFO must drop the request
    /// instead of retrying it forever.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::NotConnected | RpcError::Timeout | RpcError::Transport(_) => true,
            RpcError::Call { code, .. } => code.is_retryable(),
            RpcError::InvalidPayload(_) => false,
            RpcError::Aborted => true,
        }
    }
}

/// Station-level errors.
#[derive(Debug, Error)]
pub enum StationError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid connector id {0}")]
    InvalidConnector(u32),

    #[error("duplicate handler registered for action '{0}'")]
    DuplicateHandler(String),
}

pub type StationResult<T> = Result<T, StationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(RpcError::Timeout.is_retryable());
        assert!(RpcError::NotConnected.is_retryable());
        assert!(RpcError::Transport("reset by peer".into()).is_retryable());
    }

    #[test]
    fn constraint_violations_are_not_retryable() {
        let err = RpcError::Call {
            code: RpcErrorCode::PropertyConstraintViolation,
            description: "bad connector".into(),
        };
        assert!(!err.is_retryable());

        let err = RpcError::Call {
            code: RpcErrorCode::InternalError,
            description: "try again".into(),
        };
        assert!(err.is_retryable());
    }
}
