// Publisher - delivers one message at a time, resilient to broker disconnects

use crate::application::codec::CodecRegistry;
use crate::application::connection_manager::ConnectionManager;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{
    default_queues, validate_queue_name, JobStatus, Message, MessageId, QueueDeclaration,
    WorkflowStatus, WorkflowSubmission, DEFAULT_MAX_PRIORITY,
};
use crate::error::{MqError, Result};
use crate::port::id_provider::UuidProvider;
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{Connection, IdProvider, PublishProperties, TimeProvider, TransportError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Sends serialized messages to named queues
///
/// Each `publish` makes at most `retry_count + 1` send attempts, each on a
/// live connection. Either the broker took the message or an error is
/// returned; messages are never dropped silently. There is no
/// deduplication: consumers must tolerate duplicates.
pub struct Publisher {
    connection: ConnectionManager,
    retry_policy: RetryPolicy,
    codecs: CodecRegistry,
    id_provider: Arc<dyn IdProvider>,
    queues: HashMap<String, QueueDeclaration>,
    declared: HashSet<String>,
    declared_generation: u64,
}

impl Publisher {
    pub fn new(connection: ConnectionManager, retry_policy: RetryPolicy) -> Self {
        Self {
            connection,
            retry_policy,
            codecs: CodecRegistry::with_defaults(),
            id_provider: Arc::new(UuidProvider),
            queues: default_queues()
                .into_iter()
                .map(|q| (q.name.clone(), q))
                .collect(),
            declared: HashSet::new(),
            declared_generation: 0,
        }
    }

    /// Register a known queue declaration
    ///
    /// Replaces the default declaration of a queue with the same name.
    pub fn with_queue(mut self, queue: QueueDeclaration) -> Self {
        self.queues.insert(queue.name.clone(), queue);
        self
    }

    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn with_id_provider(mut self, id_provider: Arc<dyn IdProvider>) -> Self {
        self.id_provider = id_provider;
        self
    }

    /// Number of retries after the first send attempt
    pub fn retry_count(&self) -> u32 {
        self.retry_policy.retry_count()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Publish a message to `queue`
    ///
    /// Known queues keep their declaration: a priority sent to a known
    /// queue without priority support is dropped. Unknown queues are
    /// declared durable, with priority support if a priority is given.
    /// Returns the message id assigned to the message.
    pub async fn publish(
        &mut self,
        message: &Message,
        queue: &str,
        priority: Option<u8>,
    ) -> Result<MessageId> {
        let declaration = self.declaration_for(queue, priority)?;
        let payload = self.codecs.encode_for(queue, message)?;
        let message_id = self.id_provider.generate_id();
        let properties = PublishProperties::json(message_id.clone())
            .with_priority(declaration.effective_priority(priority));

        let mut attempt = 1;
        loop {
            let connection = self.connection.ensure_connected().await?;

            match self.send(&connection, &declaration, &payload, &properties).await {
                Ok(()) => {
                    debug!(
                        queue = %queue,
                        message_id = %message_id,
                        priority = ?properties.priority,
                        attempt = attempt,
                        "Message published"
                    );
                    return Ok(message_id);
                }
                Err(err) if err.is_transient() => match self.retry_policy.should_retry(attempt) {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            queue = %queue,
                            message_id = %message_id,
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Error while publishing, retrying"
                        );
                        self.connection.reset().await;
                        sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp => {
                        return Err(Self::failed(queue, message_id, attempt, err))
                    }
                },
                Err(err) => return Err(Self::failed(queue, message_id, attempt, err)),
            }
        }
    }

    /// Release the broker connection
    pub async fn close(&mut self) {
        debug!("Publisher: closing queue connection");
        self.connection.close().await;
        self.declared.clear();
    }

    fn declaration_for(&mut self, queue: &str, priority: Option<u8>) -> Result<QueueDeclaration> {
        if let Some(known) = self.queues.get(queue) {
            if priority.is_some() && !known.supports_priority() {
                debug!(queue = %queue, "Queue has no priority support, ignoring message priority");
            }
            return Ok(known.clone());
        }

        validate_queue_name(queue)?;
        let mut declaration = QueueDeclaration::durable(queue);
        if priority.is_some() {
            declaration = declaration.with_max_priority(DEFAULT_MAX_PRIORITY);
        }
        info!(
            queue = %queue,
            max_priority = ?declaration.max_priority,
            "Declaring previously unknown queue"
        );
        self.queues.insert(queue.to_string(), declaration.clone());
        Ok(declaration)
    }

    async fn send(
        &mut self,
        connection: &Arc<dyn Connection>,
        declaration: &QueueDeclaration,
        payload: &[u8],
        properties: &PublishProperties,
    ) -> std::result::Result<(), TransportError> {
        // Queues are redeclared on every new connection: the broker may
        // have restarted and lost transient queues.
        if self.declared_generation != self.connection.generation() {
            self.declared.clear();
            self.declared_generation = self.connection.generation();
        }
        if !self.declared.contains(&declaration.name) {
            connection.declare_queue(declaration).await?;
            self.declared.insert(declaration.name.clone());
        }
        connection.publish(declaration, payload, properties).await
    }

    fn failed(queue: &str, message_id: MessageId, attempts: u32, source: TransportError) -> MqError {
        MqError::PublishFailed {
            queue: queue.to_string(),
            message_id,
            attempts,
            source,
        }
    }
}

/// Publisher bound to the workflow submission queue
pub struct WorkflowSubmissionPublisher {
    publisher: Publisher,
    queue: QueueDeclaration,
}

impl WorkflowSubmissionPublisher {
    pub fn new(publisher: Publisher) -> Self {
        Self::with_queue(publisher, QueueDeclaration::workflow_submission())
    }

    pub fn with_queue(publisher: Publisher, queue: QueueDeclaration) -> Self {
        Self {
            publisher: publisher.with_queue(queue.clone()),
            queue,
        }
    }

    /// Publish a submission using its own priority as message priority
    pub async fn publish_workflow_submission(
        &mut self,
        submission: WorkflowSubmission,
    ) -> Result<MessageId> {
        let priority = submission.priority;
        self.publisher
            .publish(&Message::WorkflowSubmission(submission), &self.queue.name, Some(priority))
            .await
    }

    pub async fn close(&mut self) {
        self.publisher.close().await;
    }
}

/// Publisher bound to the status queue
pub struct JobStatusPublisher {
    publisher: Publisher,
    queue: QueueDeclaration,
    time_provider: Arc<dyn TimeProvider>,
}

impl JobStatusPublisher {
    pub fn new(publisher: Publisher) -> Self {
        Self::with_queue(publisher, QueueDeclaration::job_status())
    }

    pub fn with_queue(publisher: Publisher, queue: QueueDeclaration) -> Self {
        Self {
            publisher: publisher.with_queue(queue.clone()),
            queue,
            time_provider: Arc::new(SystemTimeProvider),
        }
    }

    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    /// Publish a status change stamped with the current time
    pub async fn publish_job_status(
        &mut self,
        job_id: impl Into<String>,
        workflow_uuid: impl Into<String>,
        status: WorkflowStatus,
        logs: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<MessageId> {
        let record = JobStatus {
            job_id: job_id.into(),
            workflow_uuid: workflow_uuid.into(),
            status,
            timestamp: self.time_provider.now(),
            logs,
            message: metadata,
        };
        self.publisher
            .publish(&Message::JobStatus(record), &self.queue.name, None)
            .await
    }

    pub async fn close(&mut self) {
        self.publisher.close().await;
    }
}
