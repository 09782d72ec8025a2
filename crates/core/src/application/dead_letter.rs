// Dead-letter policy for messages that cannot be handled
//
// Applies to decode failures and handler failures alike.

use crate::domain::{validate_queue_name, Delivery, QueueDeclaration};
use crate::error::{MqError, Result};
use std::fmt;
use std::str::FromStr;

/// What the consumer does with a message it could not handle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeadLetterPolicy {
    /// Negative ack without requeue; broker-side dead-letter exchange
    /// routing applies if the queue has one configured
    #[default]
    Reject,
    /// Requeue a first-time delivery, reject a redelivered one
    RequeueOnce,
    /// Republish the original payload to a durable queue, then ack
    Forward { queue: String },
}

/// Broker operation chosen for one failed delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterAction {
    Nack { requeue: bool },
    Forward(QueueDeclaration),
}

impl DeadLetterPolicy {
    pub fn forward(queue: impl Into<String>) -> Self {
        DeadLetterPolicy::Forward {
            queue: queue.into(),
        }
    }

    pub fn action_for(&self, delivery: &Delivery) -> DeadLetterAction {
        match self {
            DeadLetterPolicy::Reject => DeadLetterAction::Nack { requeue: false },
            DeadLetterPolicy::RequeueOnce => DeadLetterAction::Nack {
                requeue: !delivery.redelivered,
            },
            DeadLetterPolicy::Forward { queue } => {
                DeadLetterAction::Forward(QueueDeclaration::durable(queue.clone()))
            }
        }
    }

    /// Queue that must be declared before consuming, if any
    pub fn target_queue(&self) -> Option<QueueDeclaration> {
        match self {
            DeadLetterPolicy::Forward { queue } => Some(QueueDeclaration::durable(queue.clone())),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let DeadLetterPolicy::Forward { queue } = self {
            validate_queue_name(queue)?;
        }
        Ok(())
    }
}

impl fmt::Display for DeadLetterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadLetterPolicy::Reject => write!(f, "reject"),
            DeadLetterPolicy::RequeueOnce => write!(f, "requeue-once"),
            DeadLetterPolicy::Forward { queue } => write!(f, "forward:{}", queue),
        }
    }
}

impl FromStr for DeadLetterPolicy {
    type Err = MqError;

    /// Parses `reject`, `requeue-once` or `forward:<queue>`
    fn from_str(s: &str) -> Result<Self> {
        let policy = match s.trim() {
            "reject" | "" => DeadLetterPolicy::Reject,
            "requeue-once" => DeadLetterPolicy::RequeueOnce,
            other => match other.strip_prefix("forward:") {
                Some(queue) => DeadLetterPolicy::forward(queue),
                None => {
                    return Err(MqError::Config(format!(
                        "unknown dead-letter policy '{}' (expected reject, requeue-once or forward:<queue>)",
                        other
                    )))
                }
            },
        };
        policy.validate()?;
        Ok(policy)
    }
}
