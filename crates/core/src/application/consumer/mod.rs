// Consumer - dispatch loop over one or more queues

pub mod constants;
mod panic_guard;
mod shutdown;

pub use panic_guard::{execute_guarded_async, PanicGuardResult};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::codec::{CodecRegistry, MessageCodec};
use crate::application::connection_manager::ConnectionManager;
use crate::application::dead_letter::{DeadLetterAction, DeadLetterPolicy};
use crate::domain::{Delivery, QueueDeclaration, ReceivedMessage};
use crate::error::{MqError, Result};
use crate::port::id_provider::UuidProvider;
use crate::port::{
    Connection, HandlerError, IdProvider, MessageHandler, PublishProperties, Subscription,
    TransportError,
};
use constants::{DEFAULT_PREFETCH_COUNT, DEFAULT_RECONNECT_DELAY};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Consumer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Subscribed,
    Waiting,
    Dispatching,
    Stopped,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsumerState::Disconnected => "disconnected",
            ConsumerState::Connecting => "connecting",
            ConsumerState::Subscribed => "subscribed",
            ConsumerState::Waiting => "waiting",
            ConsumerState::Dispatching => "dispatching",
            ConsumerState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Max unacknowledged deliveries (0 = unlimited)
    pub prefetch_count: u16,
    pub dead_letter: DeadLetterPolicy,
    /// Pause between reconnect attempts after the first subscription
    pub reconnect_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            dead_letter: DeadLetterPolicy::default(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Counters reported when a consumer stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub handled: u64,
    pub handler_failures: u64,
    pub malformed: u64,
    pub dead_lettered: u64,
    pub reconnects: u64,
}

struct Binding {
    queue: QueueDeclaration,
    handler: Arc<dyn MessageHandler>,
}

/// Subscribes to bound queues and invokes one handler per delivery
///
/// Deliveries are handled one at a time, in broker order. A message is
/// acknowledged only after its handler returned successfully; decode and
/// handler failures go through the dead-letter policy and never stop the
/// loop.
pub struct Consumer {
    connection: ConnectionManager,
    config: ConsumerConfig,
    bindings: Vec<Binding>,
    codecs: CodecRegistry,
    id_provider: Arc<dyn IdProvider>,
    state: watch::Sender<ConsumerState>,
    stats: ConsumerStats,
}

impl Consumer {
    pub fn new(connection: ConnectionManager, config: ConsumerConfig) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);
        Self {
            connection,
            config,
            bindings: Vec::new(),
            codecs: CodecRegistry::with_defaults(),
            id_provider: Arc::new(UuidProvider),
            state,
            stats: ConsumerStats::default(),
        }
    }

    /// Bind a handler to a queue; binding the same queue again replaces it
    pub fn bind(mut self, queue: QueueDeclaration, handler: Arc<dyn MessageHandler>) -> Self {
        self.bindings.retain(|b| b.queue.name != queue.name);
        self.bindings.push(Binding { queue, handler });
        self
    }

    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    /// Register a single codec on top of the current registry
    pub fn with_codec(mut self, queue: impl Into<String>, codec: Arc<dyn MessageCodec>) -> Self {
        self.codecs.register(queue, codec);
        self
    }

    pub fn with_id_provider(mut self, id_provider: Arc<dyn IdProvider>) -> Self {
        self.id_provider = id_provider;
        self
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Receiver following every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    pub fn queues(&self) -> Vec<&str> {
        self.bindings.iter().map(|b| b.queue.name.as_str()).collect()
    }

    /// Consume until shutdown is requested
    ///
    /// Configuration problems fail before any I/O. A broker that cannot be
    /// reached on startup fails with `BrokerUnavailable`; once subscribed,
    /// connection losses are retried until shutdown.
    pub async fn run(&mut self, mut shutdown: ShutdownToken) -> Result<ConsumerStats> {
        self.validate()?;

        info!(
            queues = ?self.queues(),
            prefetch = self.config.prefetch_count,
            dead_letter = %self.config.dead_letter,
            "Consumer started"
        );

        let startup = tokio::select! {
            biased;
            _ = shutdown.wait() => None,
            result = self.subscribe() => Some(result),
        };
        let (mut connection, mut subscription) = match startup {
            Some(Ok(session)) => session,
            Some(Err(e)) => {
                error!(error = %e, "Consumer failed to start");
                self.stop().await;
                return Err(e);
            }
            None => {
                self.stop().await;
                return Ok(self.stats.clone());
            }
        };

        loop {
            self.set_state(ConsumerState::Waiting);

            let next = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                next = subscription.next_delivery() => next,
            };

            let failure = match next {
                Ok(Some(delivery)) => {
                    self.set_state(ConsumerState::Dispatching);
                    self.dispatch(&connection, subscription.as_mut(), delivery)
                        .await
                        .err()
                }
                Ok(None) => Some(TransportError::ConnectionClosed(
                    "subscription ended by broker".to_string(),
                )),
                Err(e) => Some(e),
            };

            if let Some(e) = failure {
                warn!(error = %e, "Consumer lost its broker session, reconnecting");
                match self.resubscribe(&mut shutdown).await {
                    Some((c, s)) => {
                        connection = c;
                        subscription = s;
                    }
                    None => break,
                }
            }
        }

        drop(subscription);
        self.stop().await;
        info!(
            handled = self.stats.handled,
            handler_failures = self.stats.handler_failures,
            malformed = self.stats.malformed,
            dead_lettered = self.stats.dead_lettered,
            reconnects = self.stats.reconnects,
            "Consumer stopped"
        );
        Ok(self.stats.clone())
    }

    fn validate(&self) -> Result<()> {
        if self.bindings.is_empty() {
            return Err(MqError::Config("consumer has no queue bindings".to_string()));
        }
        for binding in &self.bindings {
            binding.queue.validate()?;
            if !self.codecs.contains(&binding.queue.name) {
                return Err(MqError::Config(format!(
                    "no codec registered for queue '{}'",
                    binding.queue.name
                )));
            }
        }
        self.config.dead_letter.validate()?;
        if let Some(target) = self.config.dead_letter.target_queue() {
            if self.bindings.iter().any(|b| b.queue.name == target.name) {
                return Err(MqError::Config(format!(
                    "dead-letter queue '{}' is also consumed",
                    target.name
                )));
            }
        }
        Ok(())
    }

    /// Connect, declare every queue and start consuming
    async fn subscribe(&mut self) -> Result<(Arc<dyn Connection>, Box<dyn Subscription>)> {
        self.set_state(ConsumerState::Connecting);
        let connection = self.connection.ensure_connected().await?;

        for binding in &self.bindings {
            connection.declare_queue(&binding.queue).await?;
        }
        if let Some(target) = self.config.dead_letter.target_queue() {
            connection.declare_queue(&target).await?;
        }

        let queues: Vec<QueueDeclaration> = self.bindings.iter().map(|b| b.queue.clone()).collect();
        let subscription = connection
            .subscribe(&queues, self.config.prefetch_count)
            .await?;

        self.set_state(ConsumerState::Subscribed);
        info!(
            queues = ?self.queues(),
            generation = self.connection.generation(),
            "Subscribed to queues"
        );
        Ok((connection, subscription))
    }

    /// Reconnect until subscribed again or shutdown is requested
    async fn resubscribe(
        &mut self,
        shutdown: &mut ShutdownToken,
    ) -> Option<(Arc<dyn Connection>, Box<dyn Subscription>)> {
        loop {
            self.connection.reset().await;
            self.set_state(ConsumerState::Disconnected);

            let attempt = tokio::select! {
                biased;
                _ = shutdown.wait() => return None,
                result = self.subscribe() => result,
            };
            match attempt {
                Ok(session) => {
                    self.stats.reconnects += 1;
                    return Some(session);
                }
                Err(e) => {
                    self.set_state(ConsumerState::Disconnected);
                    warn!(
                        error = %e,
                        delay_ms = self.config.reconnect_delay.as_millis() as u64,
                        "Reconnect failed, retrying"
                    );
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.wait() => return None,
                _ = sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    /// Decode, handle and settle one delivery
    ///
    /// Only transport errors escape; they mean the session is gone and the
    /// unsettled delivery will come back from the broker.
    async fn dispatch(
        &mut self,
        connection: &Arc<dyn Connection>,
        subscription: &mut dyn Subscription,
        delivery: Delivery,
    ) -> std::result::Result<(), TransportError> {
        let handler = self
            .bindings
            .iter()
            .find(|b| b.queue.name == delivery.queue)
            .map(|b| Arc::clone(&b.handler));
        let (handler, codec) = match (handler, self.codecs.get(&delivery.queue)) {
            (Some(handler), Some(codec)) => (handler, codec),
            _ => {
                warn!(queue = %delivery.queue, delivery_tag = delivery.tag, "Delivery from unbound queue");
                return self.dead_letter(connection, subscription, &delivery).await;
            }
        };

        let message = match codec.decode(&delivery.queue, &delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                self.stats.malformed += 1;
                error!(
                    queue = %delivery.queue,
                    delivery_tag = delivery.tag,
                    error = %e,
                    "Malformed message"
                );
                return self.dead_letter(connection, subscription, &delivery).await;
            }
        };

        let received = ReceivedMessage::from_delivery(&delivery, message);
        let outcome = match execute_guarded_async(handler.handle(&received)).await {
            PanicGuardResult::Success(result) => result,
            PanicGuardResult::Panicked(msg) => Err(HandlerError::Panicked(msg)),
        };

        match outcome {
            Ok(()) => {
                subscription.ack(delivery.tag).await?;
                self.stats.handled += 1;
                debug!(
                    queue = %delivery.queue,
                    delivery_tag = delivery.tag,
                    message_id = ?delivery.message_id,
                    "Message handled"
                );
                Ok(())
            }
            Err(source) => {
                self.stats.handler_failures += 1;
                let err = MqError::Handler {
                    queue: delivery.queue.clone(),
                    source,
                };
                error!(delivery_tag = delivery.tag, error = %err, "Message handling failed");
                self.dead_letter(connection, subscription, &delivery).await
            }
        }
    }

    async fn dead_letter(
        &mut self,
        connection: &Arc<dyn Connection>,
        subscription: &mut dyn Subscription,
        delivery: &Delivery,
    ) -> std::result::Result<(), TransportError> {
        match self.config.dead_letter.action_for(delivery) {
            DeadLetterAction::Nack { requeue } => {
                subscription.nack(delivery.tag, requeue).await?;
                if !requeue {
                    self.stats.dead_lettered += 1;
                }
                info!(
                    queue = %delivery.queue,
                    delivery_tag = delivery.tag,
                    requeue = requeue,
                    "Message rejected"
                );
            }
            DeadLetterAction::Forward(target) => {
                let message_id = delivery
                    .message_id
                    .clone()
                    .unwrap_or_else(|| self.id_provider.generate_id());
                let properties = PublishProperties::json(message_id);
                connection
                    .publish(&target, &delivery.payload, &properties)
                    .await?;
                subscription.ack(delivery.tag).await?;
                self.stats.dead_lettered += 1;
                info!(
                    queue = %delivery.queue,
                    delivery_tag = delivery.tag,
                    dead_letter_queue = %target.name,
                    "Message forwarded to dead-letter queue"
                );
            }
        }
        Ok(())
    }

    async fn stop(&mut self) {
        self.connection.close().await;
        self.set_state(ConsumerState::Stopped);
    }

    fn set_state(&self, state: ConsumerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Consumer state changed");
        }
    }
}
