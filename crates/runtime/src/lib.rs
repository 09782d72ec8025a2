// Workflow MQ Runtime - Composition Root for embedding services
// Settings (config), logging (tracing-subscriber), AMQP wiring

pub mod factory;
pub mod logging;
pub mod settings;

pub use factory::{
    amqp_connection_manager, amqp_consumer, amqp_publisher, connection_manager, consumer,
    job_status_publisher, publisher, workflow_submission_publisher,
};
pub use logging::{init_logging, LogFormat, LogSettings};
pub use settings::{MqSettings, Secret};
