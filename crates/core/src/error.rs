// Central Error Type for the messaging layer

use crate::application::codec::CodecError;
use crate::port::{HandlerError, TransportError};
use thiserror::Error;

/// Library-level error type
#[derive(Error, Debug)]
pub enum MqError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    /// Connection could not be (re-)established within the retry ceiling
    #[error("Broker unavailable at {endpoint} after {attempts} attempt(s): {source}")]
    BrokerUnavailable {
        endpoint: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// A specific message could not be delivered to the broker
    #[error(
        "Publish to queue '{queue}' failed for message {message_id} after {attempts} attempt(s): {source}"
    )]
    PublishFailed {
        queue: String,
        message_id: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Handler error on queue '{queue}': {source}")]
    Handler {
        queue: String,
        #[source]
        source: HandlerError,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MqError {
    /// True for errors caused by deployment mistakes rather than broker state
    pub fn is_config(&self) -> bool {
        matches!(self, MqError::Config(_) | MqError::Domain(_))
    }
}

/// Result type alias using MqError
pub type Result<T> = std::result::Result<T, MqError>;
