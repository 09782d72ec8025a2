// Application Layer - Connection handling, publishing and consuming

pub mod codec;
pub mod connection_manager;
pub mod consumer;
pub mod dead_letter;
pub mod publisher;
pub mod retry;

// Re-exports
pub use codec::{CodecError, CodecRegistry, JsonCodec, MessageCodec};
pub use connection_manager::ConnectionManager;
pub use consumer::{
    shutdown_channel, Consumer, ConsumerConfig, ConsumerState, ConsumerStats, ShutdownSender,
    ShutdownToken,
};
pub use dead_letter::{DeadLetterAction, DeadLetterPolicy};
pub use publisher::{JobStatusPublisher, Publisher, WorkflowSubmissionPublisher};
pub use retry::{RetryDecision, RetryPolicy, RetryingHandler};
