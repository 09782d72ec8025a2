// Workflow MQ Infrastructure - AMQP Adapter (lapin)
// Implements: Connector, Connection, Subscription

mod connection;
mod convert;
mod subscription;

pub use connection::{AmqpConnection, AmqpConnector};
pub use subscription::AmqpSubscription;

// Note: lapin::Error conversion lives in helper functions (convert.rs)
// because of the orphan rule (no From<lapin::Error> for TransportError here)
