use rentledger_core::{CoreError, RequestId, RequestStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Corrupt row: {0}")]
    Corrupt(#[from] CoreError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Request {0} not found")]
    RequestNotFound(RequestId),
    #[error("Payment event '{0}' not found")]
    EventNotFound(String),
    #[error("Request {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },
    #[error("Transaction {0} is already classified")]
    AlreadyClassified(i64),
}
