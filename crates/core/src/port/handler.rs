// Message Handler Port
// Capability interface invoked by the Consumer once per delivered message

use crate::domain::ReceivedMessage;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Handler errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        HandlerError::Failed(reason.into())
    }
}

/// Message handler trait
///
/// A successful return acknowledges the message; an error hands it to the
/// consumer's dead-letter policy. Handlers must tolerate duplicate
/// deliveries: the broker delivers at least once.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &ReceivedMessage) -> Result<(), HandlerError>;
}

/// Adapter turning a synchronous closure into a handler
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&ReceivedMessage) -> Result<(), HandlerError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&ReceivedMessage) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, message: &ReceivedMessage) -> Result<(), HandlerError> {
        (self.f)(message)
    }
}

/// Shorthand for `Arc::new(FnHandler::new(f))`
pub fn handler_fn<F>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(&ReceivedMessage) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler::new(f))
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    type Predicate = Box<dyn Fn(&ReceivedMessage) -> bool + Send + Sync>;

    /// Records every successfully handled message, in order
    #[derive(Default)]
    pub struct RecordingHandler {
        handled: Mutex<Vec<ReceivedMessage>>,
        calls: AtomicUsize,
        fail_when: Option<Predicate>,
        panic_when: Option<Predicate>,
    }

    impl RecordingHandler {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail (without recording) every message matching `predicate`
        pub fn failing_when(
            mut self,
            predicate: impl Fn(&ReceivedMessage) -> bool + Send + Sync + 'static,
        ) -> Self {
            self.fail_when = Some(Box::new(predicate));
            self
        }

        /// Panic on every message matching `predicate`
        pub fn panicking_when(
            mut self,
            predicate: impl Fn(&ReceivedMessage) -> bool + Send + Sync + 'static,
        ) -> Self {
            self.panic_when = Some(Box::new(predicate));
            self
        }

        pub fn handled(&self) -> Vec<ReceivedMessage> {
            self.handled.lock().unwrap().clone()
        }

        pub fn count(&self) -> usize {
            self.handled.lock().unwrap().len()
        }

        /// Number of invocations, including failed ones
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Poll until `count() >= expected`; false on timeout
        pub async fn wait_for(&self, expected: usize, timeout: Duration) -> bool {
            let deadline = tokio::time::Instant::now() + timeout;
            while self.count() < expected {
                if tokio::time::Instant::now() >= deadline {
                    return false;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            true
        }

        /// Poll until `calls() >= expected`; false on timeout
        pub async fn wait_for_calls(&self, expected: usize, timeout: Duration) -> bool {
            let deadline = tokio::time::Instant::now() + timeout;
            while self.calls() < expected {
                if tokio::time::Instant::now() >= deadline {
                    return false;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            true
        }
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(&self, message: &ReceivedMessage) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(predicate) = &self.panic_when {
                if predicate(message) {
                    panic!("RecordingHandler panic on delivery {}", message.delivery_tag);
                }
            }
            if let Some(predicate) = &self.fail_when {
                if predicate(message) {
                    return Err(HandlerError::failed(format!(
                        "rejected delivery {}",
                        message.delivery_tag
                    )));
                }
            }

            self.handled.lock().unwrap().push(message.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Message;

    fn received(tag: u64) -> ReceivedMessage {
        ReceivedMessage {
            queue: "q".to_string(),
            message: Message::Raw(serde_json::json!({"n": tag})),
            delivery_tag: tag,
            priority: None,
            message_id: None,
            redelivered: false,
        }
    }

    #[tokio::test]
    async fn test_fn_handler_forwards_result() {
        let handler = handler_fn(|m| {
            if m.delivery_tag == 2 {
                Err(HandlerError::failed("boom"))
            } else {
                Ok(())
            }
        });

        assert!(handler.handle(&received(1)).await.is_ok());
        let err = handler.handle(&received(2)).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_recording_handler_records_only_successes() {
        let handler = mocks::RecordingHandler::new().failing_when(|m| m.delivery_tag == 2);

        for tag in 1..=3 {
            let _ = handler.handle(&received(tag)).await;
        }

        assert_eq!(handler.calls(), 3);
        let tags: Vec<u64> = handler.handled().iter().map(|m| m.delivery_tag).collect();
        assert_eq!(tags, vec![1, 3]);
    }
}
