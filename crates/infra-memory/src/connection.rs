// In-memory Connection and Subscription

use crate::broker::Inner;
use async_trait::async_trait;
use std::sync::Arc;
use workflow_mq_core::domain::{Delivery, DeliveryTag, QueueDeclaration};
use workflow_mq_core::port::{Connection, PublishProperties, Subscription, TransportError};

/// Session on a [`crate::MemoryBroker`]
pub struct MemoryConnection {
    inner: Arc<Inner>,
    id: u64,
}

impl MemoryConnection {
    pub(crate) fn new(inner: Arc<Inner>, id: u64) -> Self {
        Self { inner, id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn is_open(&self) -> bool {
        self.inner.state().is_open(self.id)
    }

    async fn declare_queue(&self, queue: &QueueDeclaration) -> Result<(), TransportError> {
        self.inner.state().declare_queue(self.id, queue)
    }

    async fn publish(
        &self,
        queue: &QueueDeclaration,
        payload: &[u8],
        properties: &PublishProperties,
    ) -> Result<(), TransportError> {
        self.inner
            .mutate(|state| state.publish(self.id, queue, payload, properties))
    }

    async fn subscribe(
        &self,
        queues: &[QueueDeclaration],
        prefetch: u16,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let id = self.inner.state().subscribe(self.id, queues, prefetch)?;
        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            id,
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.mutate(|state| state.close_connection(self.id));
        Ok(())
    }
}

/// Consumer registration on one or more queues
pub struct MemorySubscription {
    inner: Arc<Inner>,
    id: u64,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, TransportError> {
        loop {
            // Register interest before looking, so a publish between the
            // check and the await still wakes us.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = self.inner.state().take_next(self.id);
            if let Some(delivery) = next? {
                return Ok(Some(delivery));
            }
            notified.await;
        }
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), TransportError> {
        self.inner.mutate(|state| state.settle(self.id, tag, None))
    }

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), TransportError> {
        self.inner
            .mutate(|state| state.settle(self.id, tag, Some(requeue)))
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.inner.state().cancel_subscription(self.id);
    }
}
