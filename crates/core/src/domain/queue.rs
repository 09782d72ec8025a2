// Queue Domain Model

use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Queue identifier
pub type QueueName = String;

/// Queue carrying workflow submissions (priority-enabled)
pub const WORKFLOW_SUBMISSION_QUEUE: &str = "workflow-submission";

/// Queue carrying job and workflow status updates
pub const JOB_STATUS_QUEUE: &str = "jobs-status";

/// Highest priority accepted by the workflow submission queue
pub const DEFAULT_MAX_PRIORITY: u8 = 100;

/// AMQP short strings are limited to 255 bytes
const MAX_QUEUE_NAME_LEN: usize = 255;

/// Broker-side queue declaration
///
/// Messages are routed through `exchange` with `routing_key`; the empty
/// exchange is the broker default exchange, which routes by queue name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDeclaration {
    pub name: QueueName,
    pub durable: bool,
    pub max_priority: Option<u8>,
    pub exchange: String,
    pub routing_key: String,
}

impl QueueDeclaration {
    /// Durable queue on the default exchange, routed by its own name
    pub fn durable(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            routing_key: name.clone(),
            name,
            durable: true,
            max_priority: None,
            exchange: String::new(),
        }
    }

    /// Transient queue (lost on broker restart)
    pub fn transient(name: impl Into<String>) -> Self {
        Self {
            durable: false,
            ..Self::durable(name)
        }
    }

    pub fn with_max_priority(mut self, max_priority: u8) -> Self {
        self.max_priority = Some(max_priority);
        self
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self.routing_key = routing_key.into();
        self
    }

    /// Default declaration of the workflow submission queue
    pub fn workflow_submission() -> Self {
        Self::durable(WORKFLOW_SUBMISSION_QUEUE).with_max_priority(DEFAULT_MAX_PRIORITY)
    }

    /// Default declaration of the status queue
    pub fn job_status() -> Self {
        Self::durable(JOB_STATUS_QUEUE)
    }

    pub fn supports_priority(&self) -> bool {
        self.max_priority.is_some()
    }

    /// Priority the broker will actually apply to a message
    ///
    /// Queues without priority support ignore priorities entirely; values
    /// above `max_priority` are treated as `max_priority`.
    pub fn effective_priority(&self, priority: Option<u8>) -> Option<u8> {
        match (self.max_priority, priority) {
            (Some(max), Some(p)) => Some(p.min(max)),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_queue_name(&self.name)?;
        if self.max_priority == Some(0) {
            return Err(DomainError::InvalidPriority(0));
        }
        if self.routing_key.is_empty() && self.exchange.is_empty() {
            return Err(DomainError::ValidationError(format!(
                "queue '{}' has no routing key on the default exchange",
                self.name
            )));
        }
        Ok(())
    }
}

/// Queues every publisher and consumer knows without configuration
pub fn default_queues() -> Vec<QueueDeclaration> {
    vec![
        QueueDeclaration::workflow_submission(),
        QueueDeclaration::job_status(),
    ]
}

/// Validate a queue name against the broker's naming rules
pub fn validate_queue_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| DomainError::InvalidQueueName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_QUEUE_NAME_LEN {
        return Err(invalid("name too long (max 255 bytes)"));
    }
    if name.starts_with("amq.") {
        return Err(invalid("'amq.' prefix is reserved by the broker"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(invalid("only alphanumeric, '-', '_', '.', ':' allowed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_queue_table() {
        let submission = QueueDeclaration::workflow_submission();
        assert_eq!(submission.name, "workflow-submission");
        assert_eq!(submission.routing_key, "workflow-submission");
        assert!(submission.durable);
        assert_eq!(submission.max_priority, Some(100));

        let status = QueueDeclaration::job_status();
        assert_eq!(status.name, "jobs-status");
        assert!(!status.supports_priority());

        assert_eq!(default_queues(), vec![submission, status]);
    }

    #[test]
    fn test_effective_priority_clamps_and_ignores() {
        let queue = QueueDeclaration::durable("q").with_max_priority(10);
        assert_eq!(queue.effective_priority(Some(50)), Some(10));
        assert_eq!(queue.effective_priority(Some(3)), Some(3));
        assert_eq!(queue.effective_priority(None), None);

        let plain = QueueDeclaration::durable("q");
        assert_eq!(plain.effective_priority(Some(50)), None);
    }

    #[test]
    fn test_validate_queue_names() {
        assert!(validate_queue_name("jobs-status").is_ok());
        assert!(validate_queue_name("tenant.a:jobs_1").is_ok());

        let err = validate_queue_name("").unwrap_err();
        assert!(err.to_string().contains("empty"));

        let err = validate_queue_name(&"q".repeat(256)).unwrap_err();
        assert!(err.to_string().contains("too long"));

        let err = validate_queue_name("bad queue!").unwrap_err();
        assert!(err.to_string().contains("alphanumeric"));

        assert!(validate_queue_name("amq.gen-123").is_err());
    }

    #[test]
    fn test_zero_max_priority_rejected() {
        let queue = QueueDeclaration::durable("q").with_max_priority(0);
        assert_eq!(queue.validate(), Err(DomainError::InvalidPriority(0)));
    }
}
