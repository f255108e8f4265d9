//! # Event Source
//!
//! Where change notifications come from and how they are acknowledged.
//!
//! Delivery is at-least-once: a message that is not acknowledged comes back
//! after the queue's visibility timeout. Acknowledgement happens only once
//! the message's effects are durable in the cluster (or the message has been
//! judged undeliverable).
//!
//! ## Module Structure
//!
//! - `decode.rs` - Message body formats and `ResourceChangeEvent` decoding
//! - `sqs.rs` - Amazon SQS adapter and dead-letter forwarding

pub mod decode;
mod sqs;

pub use decode::{decode_message, DecodeError};
pub use sqs::{sdk_config_for_region, SqsDeadLetterSink, SqsEventSource, DROP_REASON_ATTRIBUTE};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("receive from '{queue}' failed: {message}")]
    Receive { queue: String, message: String },
    #[error("acknowledge of message '{message_id}' failed: {message}")]
    Acknowledge { message_id: String, message: String },
    #[error("dead-letter forward of message '{message_id}' failed: {message}")]
    DeadLetter { message_id: String, message: String },
}

/// A message as received, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Provider-assigned id, for logs
    pub message_id: String,
    /// Opaque handle required to acknowledge this delivery
    pub receipt_handle: String,
    pub body: String,
}

/// Pull-based queue with explicit acknowledgement
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Human-readable queue identifier
    fn name(&self) -> &str;

    /// Long-poll for up to `wait`; an empty batch is a normal outcome
    async fn receive(&self, wait: Duration) -> Result<Vec<QueueMessage>, SourceError>;

    /// Remove a message so it is never redelivered
    async fn acknowledge(&self, message: &QueueMessage) -> Result<(), SourceError>;
}

/// Receives poison messages before they are acknowledged
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn forward(&self, message: &QueueMessage, reason: &str) -> Result<(), SourceError>;
}
