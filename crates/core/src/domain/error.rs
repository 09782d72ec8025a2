// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid broker URI: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid queue name '{name}': {reason}")]
    InvalidQueueName { name: String, reason: String },

    #[error("Invalid max priority: {0}")]
    InvalidPriority(u8),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
