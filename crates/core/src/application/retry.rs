// Retry logic shared by Publisher and Connection Manager
use crate::domain::ReceivedMessage;
use crate::error::{MqError, Result};
use crate::port::{HandlerError, MessageHandler};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay
    Retry(Duration),
    /// Attempt ceiling reached
    GiveUp,
}

/// Bounded exponential backoff policy
///
/// `max_attempts` counts every try, the first one included, so a policy
/// with `max_attempts = 4` performs at most 3 retries.
///
/// Backoff formula:
/// delay(attempt) = min(max_delay, base_delay * backoff_multiplier ^ (attempt - 1))
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Example
    /// ```text
    /// let policy = RetryPolicy::new(4, Duration::from_millis(200), Duration::from_secs(5), 2.0);
    /// ```
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Policy allowing `retry_count` retries after the first attempt
    pub fn with_retries(retry_count: u32) -> Self {
        Self {
            max_attempts: retry_count.saturating_add(1),
            ..Self::default()
        }
    }

    /// Single attempt, no waiting
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Number of retries after the first attempt
    pub fn retry_count(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(MqError::Config("max_attempts must be at least 1".to_string()));
        }
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(MqError::Config(format!(
                "backoff_multiplier must be a finite value >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(MqError::Config(format!(
                "base_delay ({:?}) exceeds max_delay ({:?})",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        let delay_nanos = self.base_delay.as_nanos() as f64 * factor;

        if !delay_nanos.is_finite() || delay_nanos >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(delay_nanos as u64)
        }
    }

    /// Decide what to do after the given (1-based) attempt failed
    pub fn should_retry(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            warn!(
                attempt = %attempt,
                max_attempts = %self.max_attempts,
                "Max retry attempts reached"
            );
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.delay_for(attempt))
    }
}

/// Handler decorator retrying failed invocations in-process
///
/// Only `HandlerError::Failed` is retried; panics are passed through.
pub struct RetryingHandler {
    inner: Arc<dyn MessageHandler>,
    policy: RetryPolicy,
}

impl RetryingHandler {
    pub fn new(inner: Arc<dyn MessageHandler>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl MessageHandler for RetryingHandler {
    async fn handle(&self, message: &ReceivedMessage) -> std::result::Result<(), HandlerError> {
        let mut attempt = 1;
        loop {
            match self.inner.handle(message).await {
                Ok(()) => return Ok(()),
                Err(err @ HandlerError::Panicked(_)) => return Err(err),
                Err(err) => match self.policy.should_retry(attempt) {
                    RetryDecision::Retry(delay) => {
                        info!(
                            queue = %message.queue,
                            delivery_tag = message.delivery_tag,
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Retrying handler after failure"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp => return Err(err),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Message;
    use crate::port::handler_fn;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(4, Duration::from_millis(100), Duration::from_millis(500), 2.0)
    }

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(60), Duration::from_millis(500));
    }

    #[test]
    fn test_should_retry_until_ceiling() {
        let policy = policy();
        assert_eq!(
            policy.should_retry(1),
            RetryDecision::Retry(Duration::from_millis(100))
        );
        assert!(matches!(policy.should_retry(3), RetryDecision::Retry(_)));
        assert_eq!(policy.should_retry(4), RetryDecision::GiveUp);
        assert_eq!(policy.retry_count(), 3);
    }

    #[test]
    fn test_with_retries_counts_first_attempt() {
        let policy = RetryPolicy::with_retries(3);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(RetryPolicy::no_retry().retry_count(), 0);
    }

    #[test]
    fn test_validate_rejects_bad_policies() {
        assert!(policy().validate().is_ok());

        let zero = RetryPolicy {
            max_attempts: 0,
            ..policy()
        };
        assert!(zero.validate().is_err());

        let shrinking = RetryPolicy {
            backoff_multiplier: 0.5,
            ..policy()
        };
        assert!(shrinking.validate().is_err());

        let inverted = RetryPolicy {
            base_delay: Duration::from_secs(10),
            ..policy()
        };
        assert!(inverted.validate().is_err());
    }

    #[tokio::test]
    async fn test_retrying_handler_recovers_from_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let flaky = handler_fn(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(HandlerError::failed("not yet"))
            } else {
                Ok(())
            }
        });
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2), 2.0);
        let handler = RetryingHandler::new(flaky, policy);

        let message = ReceivedMessage {
            queue: "q".to_string(),
            message: Message::Raw(serde_json::json!(null)),
            delivery_tag: 1,
            priority: None,
            message_id: None,
            redelivered: false,
        };
        tokio_test::assert_ok!(handler.handle(&message).await);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
