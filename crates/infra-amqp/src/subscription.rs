// AMQP Subscription (one channel, one consumer per queue)

use crate::convert::{map_error, to_delivery};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, SelectAll};
use futures::StreamExt;
use lapin::message::Delivery as AmqpDelivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use tracing::debug;
use workflow_mq_core::domain::{Delivery, DeliveryTag, QueueDeclaration};
use workflow_mq_core::port::{Subscription, TransportError};

type TaggedDelivery = (String, Result<AmqpDelivery, lapin::Error>);

/// Empty consumer tag: the broker generates one unique to the channel
const BROKER_GENERATED_TAG: &str = "";

/// Deliveries from all subscribed queues, merged into one stream
pub struct AmqpSubscription {
    channel: Channel,
    deliveries: SelectAll<BoxStream<'static, TaggedDelivery>>,
}

impl AmqpSubscription {
    pub(crate) async fn start(
        channel: Channel,
        queues: &[QueueDeclaration],
        prefetch: u16,
    ) -> Result<Self, TransportError> {
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(map_error)?;

        let mut streams = Vec::with_capacity(queues.len());
        for queue in queues {
            let consumer = channel
                .basic_consume(
                    &queue.name,
                    BROKER_GENERATED_TAG,
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(map_error)?;

            let name = queue.name.clone();
            streams.push(consumer.map(move |d| (name.clone(), d)).boxed());
            debug!(queue = %queue.name, prefetch = prefetch, "AMQP consumer started");
        }

        Ok(Self {
            channel,
            deliveries: stream::select_all(streams),
        })
    }
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, TransportError> {
        match self.deliveries.next().await {
            Some((queue, Ok(delivery))) => Ok(Some(to_delivery(&queue, delivery))),
            Some((_, Err(e))) => Err(map_error(e)),
            None => Ok(None),
        }
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), TransportError> {
        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(map_error)
    }

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), TransportError> {
        let options = BasicNackOptions {
            multiple: false,
            requeue,
        };
        self.channel
            .basic_nack(tag, options)
            .await
            .map_err(map_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_tags_are_left_to_the_broker() {
        // A fixed tag would collide when two subscriptions share a queue
        assert_eq!(BROKER_GENERATED_TAG, "");
    }
}
