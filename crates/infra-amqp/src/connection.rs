// AMQP Connection (lapin)

use crate::convert::{basic_properties, map_error, queue_arguments};
use crate::subscription::AmqpSubscription;
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::{Channel, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, warn};
use workflow_mq_core::domain::{BrokerEndpoint, QueueDeclaration};
use workflow_mq_core::port::{Connection, Connector, PublishProperties, Subscription, TransportError};

const CLOSE_REPLY_SUCCESS: u16 = 200;

/// Opens lapin connections to a RabbitMQ-compatible broker
///
/// `amqps` endpoints use lapin's default TLS stack with certificate
/// verification.
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector {
    connection_name: Option<String>,
}

impl AmqpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name shown for the connection in the broker's management UI
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Arc<dyn Connection>, TransportError> {
        let mut properties = ConnectionProperties::default();
        if let Some(name) = &self.connection_name {
            properties = properties.with_connection_name(name.as_str().into());
        }

        let connection = lapin::Connection::connect(&endpoint.to_uri(), properties)
            .await
            .map_err(map_error)?;

        // Publisher confirms: a publish only succeeds once the broker took it
        let channel = connection.create_channel().await.map_err(map_error)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(map_error)?;

        debug!(endpoint = %endpoint, "AMQP connection established");
        Ok(Arc::new(AmqpConnection {
            connection,
            channel,
        }))
    }
}

/// One AMQP connection with a confirm-mode publishing channel
pub struct AmqpConnection {
    connection: lapin::Connection,
    channel: Channel,
}

#[async_trait]
impl Connection for AmqpConnection {
    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn declare_queue(&self, queue: &QueueDeclaration) -> Result<(), TransportError> {
        declare(&self.channel, queue).await
    }

    async fn publish(
        &self,
        queue: &QueueDeclaration,
        payload: &[u8],
        properties: &PublishProperties,
    ) -> Result<(), TransportError> {
        let confirmation = self
            .channel
            .basic_publish(
                &queue.exchange,
                &queue.routing_key,
                BasicPublishOptions::default(),
                payload,
                basic_properties(properties),
            )
            .await
            .map_err(map_error)?
            .await
            .map_err(map_error)?;

        if confirmation.is_nack() {
            return Err(TransportError::Rejected(format!(
                "broker nacked message {} on queue '{}'",
                properties.message_id, queue.name
            )));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        queues: &[QueueDeclaration],
        prefetch: u16,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        // Each subscription gets its own channel so its prefetch window and
        // delivery tags do not mix with publishing
        let channel = self.connection.create_channel().await.map_err(map_error)?;
        for queue in queues {
            declare(&channel, queue).await?;
        }
        let subscription = AmqpSubscription::start(channel, queues, prefetch).await?;
        Ok(Box::new(subscription))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.connection.status().connected() {
            return Ok(());
        }
        if let Err(e) = self.connection.close(CLOSE_REPLY_SUCCESS, "Bye").await {
            warn!(error = %e, "Error while closing AMQP connection");
            return Err(map_error(e));
        }
        Ok(())
    }
}

async fn declare(channel: &Channel, queue: &QueueDeclaration) -> Result<(), TransportError> {
    let options = QueueDeclareOptions {
        durable: queue.durable,
        ..QueueDeclareOptions::default()
    };
    channel
        .queue_declare(&queue.name, options, queue_arguments(queue))
        .await
        .map_err(map_error)?;
    Ok(())
}
