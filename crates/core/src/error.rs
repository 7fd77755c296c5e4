use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("Invalid billing period: {year}-{month}")]
    InvalidPeriod { year: i32, month: u32 },
    #[error("Invalid tracking code format: '{0}'")]
    InvalidTrackingCode(String),
    #[error("Unknown bill category: '{0}'")]
    UnknownCategory(String),
    #[error("Unknown request status: '{0}'")]
    UnknownStatus(String),
    #[error("Unknown direction: '{0}'")]
    UnknownDirection(String),
    #[error("Invalid amount: '{0}'")]
    InvalidAmount(String),
    #[error("Transaction is already classified")]
    AlreadyClassified,
    #[error("Invalid configuration: {0}")]
    Config(String),
}
