// Port Layer - Interfaces for external dependencies

pub mod handler;
pub mod id_provider; // For deterministic testing
pub mod time_provider;
pub mod transport;

// Re-exports
pub use handler::{handler_fn, FnHandler, HandlerError, MessageHandler};
pub use id_provider::IdProvider;
pub use time_provider::TimeProvider;
pub use transport::{Connection, Connector, PublishProperties, Subscription, TransportError};
