// Settings - defaults, optional TOML file, then MQ_* environment variables

use crate::logging::{LogFormat, LogSettings};
use anyhow::Context;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use workflow_mq_core::application::connection_manager::DEFAULT_CONNECT_TIMEOUT;
use workflow_mq_core::application::{ConsumerConfig, DeadLetterPolicy, RetryPolicy};
use workflow_mq_core::domain::{
    BrokerEndpoint, QueueDeclaration, Scheme, DEFAULT_MAX_PRIORITY, JOB_STATUS_QUEUE,
    WORKFLOW_SUBMISSION_QUEUE,
};
use workflow_mq_core::error::{MqError, Result};

/// Prefix of every environment variable read by [`MqSettings::load`]
pub const ENV_PREFIX: &str = "MQ";

const DEFAULT_HOST: &str = "message-broker.default.svc.cluster.local";
const DEFAULT_USER: &str = "test";
const DEFAULT_PASSWORD: &str = "1234";
const DEFAULT_PRODUCER_MAX_RETRIES: u32 = 3;

/// String that never shows up in logs
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}

/// Broker, retry, consumer and logging settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MqSettings {
    /// Full broker URI; overrides host, port, user, password, vhost and tls
    pub uri: Option<Secret>,
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: Secret,
    pub vhost: String,
    pub tls: bool,

    /// Retries after the first publish attempt
    pub producer_max_retries: u32,
    pub connect_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_backoff_multiplier: f64,
    pub connect_timeout_ms: u64,

    pub prefetch_count: u16,
    pub reconnect_delay_ms: u64,
    /// `reject`, `requeue-once` or `forward:<queue>`
    pub dead_letter: String,

    pub submission_queue: String,
    pub submission_max_priority: u8,
    pub status_queue: String,

    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
}

impl Default for MqSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let consumer = ConsumerConfig::default();
        Self {
            uri: None,
            host: DEFAULT_HOST.to_string(),
            port: None,
            user: DEFAULT_USER.to_string(),
            password: Secret::new(DEFAULT_PASSWORD),
            vhost: "/".to_string(),
            tls: false,
            producer_max_retries: DEFAULT_PRODUCER_MAX_RETRIES,
            connect_max_attempts: retry.max_attempts,
            retry_base_delay_ms: retry.base_delay.as_millis() as u64,
            retry_max_delay_ms: retry.max_delay.as_millis() as u64,
            retry_backoff_multiplier: retry.backoff_multiplier,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            prefetch_count: consumer.prefetch_count,
            reconnect_delay_ms: consumer.reconnect_delay.as_millis() as u64,
            dead_letter: consumer.dead_letter.to_string(),
            submission_queue: WORKFLOW_SUBMISSION_QUEUE.to_string(),
            submission_max_priority: DEFAULT_MAX_PRIORITY,
            status_queue: JOB_STATUS_QUEUE.to_string(),
            log_format: LogFormat::default(),
            log_dir: None,
        }
    }
}

impl MqSettings {
    /// Load from an optional TOML file and the process environment
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_from(file, None)
    }

    /// Load with an explicit environment instead of the process one
    pub fn load_from(
        file: Option<&Path>,
        environment: Option<HashMap<String, String>>,
    ) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(environment),
        );

        let settings: MqSettings = builder
            .build()
            .context("Failed to read messaging settings")?
            .try_deserialize()
            .context("Invalid messaging settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check that every setting converts into a usable core value
    pub fn validate(&self) -> Result<()> {
        self.endpoint()?;
        self.connect_retry_policy().validate()?;
        self.publish_retry_policy().validate()?;
        self.dead_letter_policy()?;
        self.submission_queue().validate()?;
        self.status_queue().validate()?;
        if self.connect_timeout_ms == 0 {
            return Err(MqError::Config("connect_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Result<BrokerEndpoint> {
        if let Some(uri) = &self.uri {
            return Ok(BrokerEndpoint::parse(uri.expose())?);
        }
        let scheme = if self.tls { Scheme::Amqps } else { Scheme::Amqp };
        let port = self.port.unwrap_or_else(|| scheme.default_port());
        Ok(BrokerEndpoint::new(
            scheme,
            self.host.as_str(),
            port,
            self.vhost.as_str(),
            self.user.as_str(),
            self.password.expose(),
        )?)
    }

    fn backoff(&self, max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
            self.retry_backoff_multiplier,
        )
    }

    pub fn connect_retry_policy(&self) -> RetryPolicy {
        self.backoff(self.connect_max_attempts)
    }

    pub fn publish_retry_policy(&self) -> RetryPolicy {
        self.backoff(self.producer_max_retries.saturating_add(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn dead_letter_policy(&self) -> Result<DeadLetterPolicy> {
        self.dead_letter.parse()
    }

    pub fn consumer_config(&self) -> Result<ConsumerConfig> {
        Ok(ConsumerConfig {
            prefetch_count: self.prefetch_count,
            dead_letter: self.dead_letter_policy()?,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        })
    }

    pub fn submission_queue(&self) -> QueueDeclaration {
        QueueDeclaration::durable(self.submission_queue.as_str())
            .with_max_priority(self.submission_max_priority)
    }

    pub fn status_queue(&self) -> QueueDeclaration {
        QueueDeclaration::durable(self.status_queue.as_str())
    }

    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            format: self.log_format,
            directory: self.log_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let settings = MqSettings::load_from(None, env(&[])).unwrap();
        assert_eq!(settings, MqSettings::default());
        assert_eq!(settings.publish_retry_policy().retry_count(), 3);

        let endpoint = settings.endpoint().unwrap();
        assert_eq!(endpoint.host(), DEFAULT_HOST);
        assert_eq!(endpoint.port(), 5672);
        assert_eq!(endpoint.vhost(), "/");
        assert_eq!(settings.submission_queue(), QueueDeclaration::workflow_submission());
        assert_eq!(settings.status_queue(), QueueDeclaration::job_status());
        assert_eq!(settings.dead_letter_policy().unwrap(), DeadLetterPolicy::Reject);
    }

    #[test]
    fn test_environment_overrides() {
        let settings = MqSettings::load_from(
            None,
            env(&[
                ("MQ_HOST", "rabbit.internal"),
                ("MQ_TLS", "true"),
                ("MQ_PRODUCER_MAX_RETRIES", "5"),
                ("MQ_PREFETCH_COUNT", "10"),
                ("MQ_DEAD_LETTER", "forward:jobs-status.dead"),
                ("MQ_SUBMISSION_MAX_PRIORITY", "10"),
                ("MQ_LOG_FORMAT", "json"),
            ]),
        )
        .unwrap();

        let endpoint = settings.endpoint().unwrap();
        assert!(endpoint.is_tls());
        assert_eq!(endpoint.port(), 5671);
        assert_eq!(endpoint.host(), "rabbit.internal");
        assert_eq!(settings.publish_retry_policy().max_attempts, 6);
        assert_eq!(settings.consumer_config().unwrap().prefetch_count, 10);
        assert_eq!(
            settings.dead_letter_policy().unwrap(),
            DeadLetterPolicy::forward("jobs-status.dead")
        );
        assert_eq!(settings.submission_queue().max_priority, Some(10));
        assert_eq!(settings.log_settings().format, LogFormat::Json);
    }

    #[test]
    fn test_uri_overrides_parts() {
        let settings = MqSettings::load_from(
            None,
            env(&[("MQ_URI", "amqp://svc:s3cret@mq:5673/reana"), ("MQ_HOST", "ignored")]),
        )
        .unwrap();

        let endpoint = settings.endpoint().unwrap();
        assert_eq!(endpoint.host(), "mq");
        assert_eq!(endpoint.port(), 5673);
        assert_eq!(endpoint.username(), "svc");
        assert_eq!(endpoint.vhost(), "reana");
        assert!(!format!("{:?}", settings).contains("s3cret"));
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        tokio_test::assert_err!(MqSettings::load_from(None, env(&[("MQ_DEAD_LETTER", "shred")])));
        tokio_test::assert_err!(MqSettings::load_from(None, env(&[("MQ_CONNECT_MAX_ATTEMPTS", "0")])));
        tokio_test::assert_err!(MqSettings::load_from(None, env(&[("MQ_STATUS_QUEUE", "amq.status")])));
        tokio_test::assert_err!(MqSettings::load_from(None, env(&[("MQ_URI", "http://mq")])));
        tokio_test::assert_err!(MqSettings::load_from(None, env(&[("MQ_PORT", "not-a-port")])));
    }
}
