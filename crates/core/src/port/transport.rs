// Transport Port (broker connection abstraction)
// Adapters: AMQP (lapin) and in-memory broker

use crate::domain::{BrokerEndpoint, Delivery, DeliveryTag, MessageId, QueueDeclaration};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Transport-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Access refused: {0}")]
    AccessRefused(String),

    #[error("Broker rejected the message: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Transient errors are worth a reconnect-and-retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionRefused(_)
                | TransportError::Timeout(_)
                | TransportError::ConnectionClosed(_)
                | TransportError::Rejected(_)
        )
    }
}

/// Per-message publish properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishProperties {
    pub message_id: MessageId,
    pub priority: Option<u8>,
    /// Persistent messages survive a broker restart on durable queues
    pub persistent: bool,
    pub content_type: String,
}

impl PublishProperties {
    pub fn json(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            priority: None,
            persistent: true,
            content_type: "application/json".to_string(),
        }
    }

    pub fn with_priority(mut self, priority: Option<u8>) -> Self {
        self.priority = priority;
        self
    }
}

/// Factory of broker connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a new transport session (single attempt, no retries)
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Arc<dyn Connection>, TransportError>;
}

/// Live transport session
#[async_trait]
pub trait Connection: Send + Sync {
    /// Liveness check without network I/O
    fn is_open(&self) -> bool;

    /// Declare a queue (idempotent for identical declarations)
    async fn declare_queue(&self, queue: &QueueDeclaration) -> Result<(), TransportError>;

    /// Send one message and wait for the broker to take responsibility for it
    async fn publish(
        &self,
        queue: &QueueDeclaration,
        payload: &[u8],
        properties: &PublishProperties,
    ) -> Result<(), TransportError>;

    /// Start consuming from all given queues
    ///
    /// At most `prefetch` deliveries stay unacknowledged at a time
    /// (0 = unlimited).
    async fn subscribe(
        &self,
        queues: &[QueueDeclaration],
        prefetch: u16,
    ) -> Result<Box<dyn Subscription>, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Stream of deliveries from one or more queues
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery
    ///
    /// Returns `Ok(None)` when the broker ended the subscription. Must be
    /// cancel-safe: dropping the future never loses a delivery.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, TransportError>;

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), TransportError>;

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), TransportError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Published message captured by [`FlakyConnector`]
    #[derive(Debug, Clone)]
    pub struct PublishedRecord {
        pub queue: String,
        pub payload: Vec<u8>,
        pub properties: PublishProperties,
    }

    #[derive(Default)]
    struct FlakyState {
        fail_connects: AtomicU32,
        fail_publishes: AtomicU32,
        refuse_access: AtomicBool,
        connect_calls: AtomicU32,
        publish_calls: AtomicU32,
        declared: Mutex<Vec<QueueDeclaration>>,
        published: Mutex<Vec<PublishedRecord>>,
        connections: Mutex<Vec<Arc<AtomicBool>>>,
    }

    /// Connector whose connects and publishes fail a scripted number of times
    ///
    /// A failed publish also drops the connection it was sent on. Does not
    /// support subscriptions.
    #[derive(Clone, Default)]
    pub struct FlakyConnector {
        state: Arc<FlakyState>,
    }

    impl FlakyConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_connects(self, count: u32) -> Self {
            self.state.fail_connects.store(count, Ordering::SeqCst);
            self
        }

        pub fn failing_publishes(self, count: u32) -> Self {
            self.state.fail_publishes.store(count, Ordering::SeqCst);
            self
        }

        pub fn refusing_access(self) -> Self {
            self.state.refuse_access.store(true, Ordering::SeqCst);
            self
        }

        pub fn connect_calls(&self) -> u32 {
            self.state.connect_calls.load(Ordering::SeqCst)
        }

        pub fn publish_calls(&self) -> u32 {
            self.state.publish_calls.load(Ordering::SeqCst)
        }

        pub fn declared(&self) -> Vec<QueueDeclaration> {
            self.state.declared.lock().unwrap().clone()
        }

        pub fn published(&self) -> Vec<PublishedRecord> {
            self.state.published.lock().unwrap().clone()
        }

        /// Drop every connection handed out so far
        pub fn kill_all(&self) {
            for open in self.state.connections.lock().unwrap().iter() {
                open.store(false, Ordering::SeqCst);
            }
        }
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        async fn connect(
            &self,
            endpoint: &BrokerEndpoint,
        ) -> Result<Arc<dyn Connection>, TransportError> {
            self.state.connect_calls.fetch_add(1, Ordering::SeqCst);

            if self.state.refuse_access.load(Ordering::SeqCst) {
                return Err(TransportError::AccessRefused(endpoint.username().to_string()));
            }
            let remaining = self.state.fail_connects.load(Ordering::SeqCst);
            if remaining > 0 {
                self.state.fail_connects.store(remaining - 1, Ordering::SeqCst);
                return Err(TransportError::ConnectionRefused(endpoint.to_string()));
            }

            let open = Arc::new(AtomicBool::new(true));
            self.state.connections.lock().unwrap().push(Arc::clone(&open));
            Ok(Arc::new(FlakyConnection {
                open,
                state: Arc::clone(&self.state),
            }))
        }
    }

    struct FlakyConnection {
        open: Arc<AtomicBool>,
        state: Arc<FlakyState>,
    }

    impl FlakyConnection {
        fn check_open(&self) -> Result<(), TransportError> {
            if self.open.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(TransportError::ConnectionClosed("connection killed".to_string()))
            }
        }
    }

    #[async_trait]
    impl Connection for FlakyConnection {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn declare_queue(&self, queue: &QueueDeclaration) -> Result<(), TransportError> {
            self.check_open()?;
            self.state.declared.lock().unwrap().push(queue.clone());
            Ok(())
        }

        async fn publish(
            &self,
            queue: &QueueDeclaration,
            payload: &[u8],
            properties: &PublishProperties,
        ) -> Result<(), TransportError> {
            self.state.publish_calls.fetch_add(1, Ordering::SeqCst);
            self.check_open()?;

            let remaining = self.state.fail_publishes.load(Ordering::SeqCst);
            if remaining > 0 {
                self.state.fail_publishes.store(remaining - 1, Ordering::SeqCst);
                self.open.store(false, Ordering::SeqCst);
                return Err(TransportError::ConnectionClosed("injected publish failure".to_string()));
            }

            self.state.published.lock().unwrap().push(PublishedRecord {
                queue: queue.name.clone(),
                payload: payload.to_vec(),
                properties: properties.clone(),
            });
            Ok(())
        }

        async fn subscribe(
            &self,
            _queues: &[QueueDeclaration],
            _prefetch: u16,
        ) -> Result<Box<dyn Subscription>, TransportError> {
            Err(TransportError::Protocol(
                "FlakyConnector does not support subscriptions".to_string(),
            ))
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.open.store(false, Ordering::SeqCst);
            Ok(())
        }
    }
}
