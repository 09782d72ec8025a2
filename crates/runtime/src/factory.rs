// Factories wiring settings and a connector into core services

use crate::settings::MqSettings;
use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use workflow_mq_core::application::{
    CodecRegistry, ConnectionManager, Consumer, JobStatusPublisher, JsonCodec, Publisher,
    WorkflowSubmissionPublisher,
};
use workflow_mq_core::port::Connector;
use workflow_mq_infra_amqp::AmqpConnector;

/// Codecs for the configured submission and status queues
fn codecs(settings: &MqSettings) -> CodecRegistry {
    CodecRegistry::new()
        .with(
            settings.submission_queue.as_str(),
            Arc::new(JsonCodec::workflow_submission()),
        )
        .with(settings.status_queue.as_str(), Arc::new(JsonCodec::job_status()))
}

pub fn connection_manager(
    settings: &MqSettings,
    connector: Arc<dyn Connector>,
) -> anyhow::Result<ConnectionManager> {
    let endpoint = settings.endpoint().context("Invalid broker endpoint")?;
    let retry_policy = settings.connect_retry_policy();
    retry_policy
        .validate()
        .context("Invalid connection retry settings")?;
    Ok(ConnectionManager::new(endpoint, connector, retry_policy)
        .with_connect_timeout(settings.connect_timeout()))
}

/// Publisher aware of the configured queue declarations
pub fn publisher(settings: &MqSettings, connector: Arc<dyn Connector>) -> anyhow::Result<Publisher> {
    let retry_policy = settings.publish_retry_policy();
    retry_policy
        .validate()
        .context("Invalid publish retry settings")?;
    Ok(
        Publisher::new(connection_manager(settings, connector)?, retry_policy)
            .with_codecs(codecs(settings))
            .with_queue(settings.submission_queue())
            .with_queue(settings.status_queue()),
    )
}

pub fn workflow_submission_publisher(
    settings: &MqSettings,
    connector: Arc<dyn Connector>,
) -> anyhow::Result<WorkflowSubmissionPublisher> {
    Ok(WorkflowSubmissionPublisher::with_queue(
        publisher(settings, connector)?,
        settings.submission_queue(),
    ))
}

pub fn job_status_publisher(
    settings: &MqSettings,
    connector: Arc<dyn Connector>,
) -> anyhow::Result<JobStatusPublisher> {
    Ok(JobStatusPublisher::with_queue(
        publisher(settings, connector)?,
        settings.status_queue(),
    ))
}

/// Consumer with configured prefetch and dead-letter policy, no bindings yet
pub fn consumer(settings: &MqSettings, connector: Arc<dyn Connector>) -> anyhow::Result<Consumer> {
    let config = settings
        .consumer_config()
        .context("Invalid consumer settings")?;
    Ok(Consumer::new(connection_manager(settings, connector)?, config).with_codecs(codecs(settings)))
}

fn amqp_connector(role: &str) -> Arc<dyn Connector> {
    Arc::new(AmqpConnector::new().with_connection_name(format!("workflow-mq-{}", role)))
}

pub fn amqp_connection_manager(settings: &MqSettings) -> anyhow::Result<ConnectionManager> {
    connection_manager(settings, amqp_connector("connection"))
}

pub fn amqp_publisher(settings: &MqSettings) -> anyhow::Result<Publisher> {
    let endpoint = settings.endpoint()?;
    info!(endpoint = %endpoint, "Creating AMQP publisher");
    publisher(settings, amqp_connector("publisher"))
}

pub fn amqp_consumer(settings: &MqSettings) -> anyhow::Result<Consumer> {
    let endpoint = settings.endpoint()?;
    info!(endpoint = %endpoint, "Creating AMQP consumer");
    consumer(settings, amqp_connector("consumer"))
}
