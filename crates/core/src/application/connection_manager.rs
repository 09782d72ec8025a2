// Connection Manager - owns one broker connection and repairs it on demand

use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::BrokerEndpoint;
use crate::error::{MqError, Result};
use crate::port::{Connection, Connector, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Default bound on a single connect attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Produces a usable live connection, hiding transient failures
///
/// Holds at most one connection; reconnecting always replaces it. Not
/// shared: each Publisher and Consumer owns its own manager.
pub struct ConnectionManager {
    endpoint: BrokerEndpoint,
    connector: Arc<dyn Connector>,
    retry_policy: RetryPolicy,
    connect_timeout: Duration,
    current: Option<Arc<dyn Connection>>,
    generation: u64,
}

impl ConnectionManager {
    pub fn new(
        endpoint: BrokerEndpoint,
        connector: Arc<dyn Connector>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            endpoint,
            connector,
            retry_policy,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            current: None,
            generation: 0,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Number of connections established so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_connected(&self) -> bool {
        self.current.as_ref().is_some_and(|c| c.is_open())
    }

    /// Establish a fresh connection, replacing the current one
    ///
    /// Retries refusals, timeouts and other transient errors with the
    /// configured backoff; stops at once on non-transient errors.
    pub async fn connect(&mut self) -> Result<Arc<dyn Connection>> {
        self.reset().await;

        let mut attempt = 1;
        loop {
            match self.try_connect().await {
                Ok(connection) => {
                    self.generation += 1;
                    info!(
                        endpoint = %self.endpoint,
                        attempt = attempt,
                        generation = self.generation,
                        "Connected to broker"
                    );
                    self.current = Some(Arc::clone(&connection));
                    return Ok(connection);
                }
                Err(err) if err.is_transient() => match self.retry_policy.should_retry(attempt) {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            endpoint = %self.endpoint,
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Broker connection failed, retrying"
                        );
                        sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp => return Err(self.unavailable(attempt, err)),
                },
                Err(err) => {
                    warn!(endpoint = %self.endpoint, error = %err, "Broker connection failed permanently");
                    return Err(self.unavailable(attempt, err));
                }
            }
        }
    }

    /// Return the live connection, reconnecting if it is gone or dead
    ///
    /// Idempotent; safe to call before every operation.
    pub async fn ensure_connected(&mut self) -> Result<Arc<dyn Connection>> {
        if let Some(connection) = &self.current {
            if connection.is_open() {
                return Ok(Arc::clone(connection));
            }
            debug!(endpoint = %self.endpoint, "Broker connection lost, reconnecting");
        }
        self.connect().await
    }

    /// Close and forget the current connection
    pub async fn reset(&mut self) {
        if let Some(connection) = self.current.take() {
            if connection.is_open() {
                if let Err(e) = connection.close().await {
                    debug!(error = %e, "Ignoring error while closing stale connection");
                }
            }
        }
    }

    pub async fn close(&mut self) {
        if self.current.is_some() {
            info!(endpoint = %self.endpoint, "Closing broker connection");
        }
        self.reset().await;
    }

    async fn try_connect(&self) -> std::result::Result<Arc<dyn Connection>, TransportError> {
        match timeout(self.connect_timeout, self.connector.connect(&self.endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.connect_timeout.as_millis() as u64)),
        }
    }

    fn unavailable(&self, attempts: u32, source: TransportError) -> MqError {
        MqError::BrokerUnavailable {
            endpoint: self.endpoint.to_string(),
            attempts,
            source,
        }
    }
}
