// Domain Layer - Pure messaging entities

pub mod delivery;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod queue;

// Re-exports
pub use delivery::{Delivery, DeliveryTag, MessageId, ReceivedMessage};
pub use endpoint::{BrokerEndpoint, Scheme};
pub use error::DomainError;
pub use message::{JobStatus, Message, MessageKind, WorkflowStatus, WorkflowSubmission};
pub use queue::{
    default_queues, validate_queue_name, QueueDeclaration, QueueName, DEFAULT_MAX_PRIORITY,
    JOB_STATUS_QUEUE, WORKFLOW_SUBMISSION_QUEUE,
};
