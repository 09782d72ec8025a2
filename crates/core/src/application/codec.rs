// Message Codec - record <-> wire payload
//
// JSON on the wire, matching what the platform services already exchange.

use crate::domain::{
    JobStatus, Message, MessageKind, WorkflowSubmission, JOB_STATUS_QUEUE,
    WORKFLOW_SUBMISSION_QUEUE,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Payload could not be decoded into the queue's record type
    #[error("Malformed message on queue '{queue}' at byte {offset}: {reason}")]
    MalformedMessage {
        queue: String,
        offset: usize,
        reason: String,
    },

    #[error("Cannot encode {found} message with {expected} codec")]
    KindMismatch {
        expected: MessageKind,
        found: MessageKind,
    },

    #[error("Failed to encode {kind} message: {reason}")]
    Encode { kind: MessageKind, reason: String },
}

/// Deterministic, reversible mapping between records and payload bytes
///
/// Implementations must satisfy `decode(q, encode(m)) == m` for every
/// valid record `m` of their kind.
pub trait MessageCodec: Send + Sync {
    fn kind(&self) -> MessageKind;

    fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, queue: &str, payload: &[u8]) -> Result<Message, CodecError>;
}

/// JSON codec for one message kind
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec {
    kind: MessageKind,
}

impl JsonCodec {
    pub fn new(kind: MessageKind) -> Self {
        Self { kind }
    }

    pub fn workflow_submission() -> Self {
        Self::new(MessageKind::WorkflowSubmission)
    }

    pub fn job_status() -> Self {
        Self::new(MessageKind::JobStatus)
    }

    pub fn raw() -> Self {
        Self::new(MessageKind::Raw)
    }
}

impl MessageCodec for JsonCodec {
    fn kind(&self) -> MessageKind {
        self.kind
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        if message.kind() != self.kind {
            return Err(CodecError::KindMismatch {
                expected: self.kind,
                found: message.kind(),
            });
        }

        let encoded = match message {
            Message::WorkflowSubmission(m) => serde_json::to_vec(m),
            Message::JobStatus(m) => serde_json::to_vec(m),
            Message::Raw(v) => serde_json::to_vec(v),
        };
        encoded.map_err(|e| CodecError::Encode {
            kind: self.kind,
            reason: e.to_string(),
        })
    }

    fn decode(&self, queue: &str, payload: &[u8]) -> Result<Message, CodecError> {
        let malformed = |e: serde_json::Error| CodecError::MalformedMessage {
            queue: queue.to_string(),
            offset: byte_offset(payload, e.line(), e.column()),
            reason: e.to_string(),
        };

        match self.kind {
            MessageKind::WorkflowSubmission => serde_json::from_slice::<WorkflowSubmission>(payload)
                .map(Message::WorkflowSubmission)
                .map_err(malformed),
            MessageKind::JobStatus => serde_json::from_slice::<JobStatus>(payload)
                .map(Message::JobStatus)
                .map_err(malformed),
            MessageKind::Raw => serde_json::from_slice::<serde_json::Value>(payload)
                .map(Message::Raw)
                .map_err(malformed),
        }
    }
}

/// Convert serde_json's 1-based line/column into a byte offset
fn byte_offset(payload: &[u8], line: usize, column: usize) -> usize {
    if line == 0 {
        return 0;
    }
    let line_start = payload
        .split(|&b| b == b'\n')
        .take(line - 1)
        .map(|l| l.len() + 1)
        .sum::<usize>();
    (line_start + column.saturating_sub(1)).min(payload.len())
}

/// Queue name -> codec
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn MessageCodec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the platform's default queues bound
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(WORKFLOW_SUBMISSION_QUEUE, Arc::new(JsonCodec::workflow_submission()));
        registry.register(JOB_STATUS_QUEUE, Arc::new(JsonCodec::job_status()));
        registry
    }

    pub fn register(&mut self, queue: impl Into<String>, codec: Arc<dyn MessageCodec>) {
        self.codecs.insert(queue.into(), codec);
    }

    pub fn with(mut self, queue: impl Into<String>, codec: Arc<dyn MessageCodec>) -> Self {
        self.register(queue, codec);
        self
    }

    pub fn get(&self, queue: &str) -> Option<Arc<dyn MessageCodec>> {
        self.codecs.get(queue).cloned()
    }

    pub fn contains(&self, queue: &str) -> bool {
        self.codecs.contains_key(queue)
    }

    /// Encode for a queue, falling back to the JSON codec of the message kind
    pub fn encode_for(&self, queue: &str, message: &Message) -> Result<Vec<u8>, CodecError> {
        match self.codecs.get(queue) {
            Some(codec) => codec.encode(message),
            None => JsonCodec::new(message.kind()).encode(message),
        }
    }
}
