// Conversions between port types and lapin types

use lapin::message::Delivery as AmqpDelivery;
use lapin::protocol::{AMQPErrorKind, AMQPHardError, AMQPSoftError};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::BasicProperties;
use std::io;
use workflow_mq_core::domain::{Delivery, QueueDeclaration};
use workflow_mq_core::port::{PublishProperties, TransportError};

const MAX_PRIORITY_ARGUMENT: &str = "x-max-priority";

/// AMQP delivery mode for messages written to disk
const PERSISTENT_DELIVERY_MODE: u8 = 2;
const TRANSIENT_DELIVERY_MODE: u8 = 1;

/// Classify a lapin error so callers can tell transient from permanent
pub(crate) fn map_error(err: lapin::Error) -> TransportError {
    match &err {
        lapin::Error::IOError(io_err) => match io_err.kind() {
            io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused(err.to_string()),
            _ => TransportError::ConnectionClosed(err.to_string()),
        },
        lapin::Error::InvalidConnectionState(_)
        | lapin::Error::InvalidChannelState(_)
        | lapin::Error::MissingHeartbeatError => TransportError::ConnectionClosed(err.to_string()),
        lapin::Error::ProtocolError(amqp) => map_protocol_error(amqp.kind(), err.to_string()),
        _ => TransportError::Protocol(err.to_string()),
    }
}

/// Hard errors close the whole connection, so a fresh one may succeed.
/// Soft errors close one channel because of what was asked of it, and
/// asking again on a new connection fails the same way.
fn map_protocol_error(kind: &AMQPErrorKind, text: String) -> TransportError {
    match kind {
        AMQPErrorKind::Soft(AMQPSoftError::ACCESSREFUSED)
        | AMQPErrorKind::Hard(AMQPHardError::NOTALLOWED) => TransportError::AccessRefused(text),
        AMQPErrorKind::Hard(_) => TransportError::ConnectionClosed(text),
        AMQPErrorKind::Soft(_) => TransportError::Protocol(text),
    }
}

/// Queue arguments for a declaration
pub(crate) fn queue_arguments(queue: &QueueDeclaration) -> FieldTable {
    let mut arguments = FieldTable::default();
    if let Some(max_priority) = queue.max_priority {
        arguments.insert(
            ShortString::from(MAX_PRIORITY_ARGUMENT),
            AMQPValue::LongInt(i32::from(max_priority)),
        );
    }
    arguments
}

pub(crate) fn basic_properties(properties: &PublishProperties) -> BasicProperties {
    let delivery_mode = if properties.persistent {
        PERSISTENT_DELIVERY_MODE
    } else {
        TRANSIENT_DELIVERY_MODE
    };
    let mut amqp = BasicProperties::default()
        .with_message_id(ShortString::from(properties.message_id.as_str()))
        .with_content_type(ShortString::from(properties.content_type.as_str()))
        .with_delivery_mode(delivery_mode);
    if let Some(priority) = properties.priority {
        amqp = amqp.with_priority(priority);
    }
    amqp
}

pub(crate) fn to_delivery(queue: &str, delivery: AmqpDelivery) -> Delivery {
    from_parts(
        queue,
        delivery.delivery_tag,
        delivery.data,
        delivery.redelivered,
        &delivery.properties,
    )
}

fn from_parts(
    queue: &str,
    tag: u64,
    payload: Vec<u8>,
    redelivered: bool,
    properties: &BasicProperties,
) -> Delivery {
    Delivery {
        queue: queue.to_string(),
        tag,
        payload,
        priority: *properties.priority(),
        message_id: properties.message_id().as_ref().map(|id| id.as_str().to_string()),
        redelivered,
    }
}
