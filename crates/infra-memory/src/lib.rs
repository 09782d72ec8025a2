// Workflow MQ Infrastructure - In-memory Broker Adapter
// Implements: Connector, Connection, Subscription

mod broker;
mod connection;

pub use broker::MemoryBroker;
pub use connection::{MemoryConnection, MemorySubscription};
