// Delivery Domain Model

use super::message::Message;
use super::queue::QueueName;

/// Broker-assigned delivery tag, unique per channel
pub type DeliveryTag = u64;

/// Publisher-assigned message identifier (UUID v4)
pub type MessageId = String;

/// Raw delivery as handed over by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub queue: QueueName,
    pub tag: DeliveryTag,
    pub payload: Vec<u8>,
    pub priority: Option<u8>,
    pub message_id: Option<MessageId>,
    /// Set by the broker when the message was delivered before and not acked
    pub redelivered: bool,
}

/// Decoded delivery handed to a message handler
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub queue: QueueName,
    pub message: Message,
    pub delivery_tag: DeliveryTag,
    pub priority: Option<u8>,
    pub message_id: Option<MessageId>,
    pub redelivered: bool,
}

impl ReceivedMessage {
    pub fn from_delivery(delivery: &Delivery, message: Message) -> Self {
        Self {
            queue: delivery.queue.clone(),
            message,
            delivery_tag: delivery.tag,
            priority: delivery.priority,
            message_id: delivery.message_id.clone(),
            redelivered: delivery.redelivered,
        }
    }
}
