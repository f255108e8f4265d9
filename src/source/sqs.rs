//! # Amazon SQS Adapter
//!
//! Long-polling receive, delete-on-acknowledge, and dead-letter forwarding.
//!
//! Credentials come from the default AWS provider chain, which covers IRSA
//! on EKS (pod service account annotated with `eks.amazonaws.com/role-arn`).

use super::{DeadLetterSink, EventSource, QueueMessage, SourceError};
use crate::constants;
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::MessageAttributeValue;
use aws_sdk_sqs::Client as SqsClient;
use std::time::Duration;
use tracing::{debug, warn};

/// Message attribute carrying the reason a message was dropped
pub const DROP_REASON_ATTRIBUTE: &str = "drop-reason";

/// Load SDK configuration for `region` from the default credential chain
pub async fn sdk_config_for_region(region: &str) -> SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await
}

#[derive(Debug, Clone)]
pub struct SqsEventSource {
    client: SqsClient,
    queue_url: String,
    max_messages: i32,
}

impl SqsEventSource {
    #[must_use]
    pub fn new(sdk_config: &SdkConfig, queue_url: &str, max_messages: i32) -> Self {
        Self {
            client: SqsClient::new(sdk_config),
            queue_url: queue_url.to_string(),
            max_messages,
        }
    }
}

#[async_trait]
impl EventSource for SqsEventSource {
    fn name(&self) -> &str {
        &self.queue_url
    }

    async fn receive(&self, wait: Duration) -> Result<Vec<QueueMessage>, SourceError> {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_possible_wrap,
            reason = "Clamped to the 20s SQS maximum"
        )]
        let wait_seconds = wait.as_secs().min(constants::MAX_RECEIVE_WAIT_SECS) as i32;

        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(self.max_messages)
            .wait_time_seconds(wait_seconds)
            .send()
            .await
            .map_err(|e| SourceError::Receive {
                queue: self.queue_url.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let messages = output
            .messages()
            .iter()
            .filter_map(|message| {
                let Some(receipt_handle) = message.receipt_handle() else {
                    warn!(
                        message.id = message.message_id().unwrap_or("unknown"),
                        "Received message without receipt handle, skipping"
                    );
                    return None;
                };
                Some(QueueMessage {
                    message_id: message.message_id().unwrap_or("unknown").to_string(),
                    receipt_handle: receipt_handle.to_string(),
                    body: message.body().unwrap_or_default().to_string(),
                })
            })
            .collect::<Vec<_>>();

        debug!(queue = %self.queue_url, count = messages.len(), "Received messages");
        Ok(messages)
    }

    async fn acknowledge(&self, message: &QueueMessage) -> Result<(), SourceError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt_handle)
            .send()
            .await
            .map_err(|e| SourceError::Acknowledge {
                message_id: message.message_id.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }
}

/// Forwards poison messages to a separate queue for inspection
#[derive(Debug, Clone)]
pub struct SqsDeadLetterSink {
    client: SqsClient,
    queue_url: String,
}

impl SqsDeadLetterSink {
    #[must_use]
    pub fn new(sdk_config: &SdkConfig, queue_url: &str) -> Self {
        Self {
            client: SqsClient::new(sdk_config),
            queue_url: queue_url.to_string(),
        }
    }
}

#[async_trait]
impl DeadLetterSink for SqsDeadLetterSink {
    async fn forward(&self, message: &QueueMessage, reason: &str) -> Result<(), SourceError> {
        let failed = |message_text: String| SourceError::DeadLetter {
            message_id: message.message_id.clone(),
            message: message_text,
        };

        let attribute = MessageAttributeValue::builder()
            .data_type("String")
            .string_value(reason)
            .build()
            .map_err(|e| failed(e.to_string()))?;

        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(&message.body)
            .message_attributes(DROP_REASON_ATTRIBUTE, attribute)
            .send()
            .await
            .map_err(|e| failed(DisplayErrorContext(&e).to_string()))?;

        debug!(message.id = %message.message_id, dead_letter.queue = %self.queue_url, "Forwarded poison message");
        Ok(())
    }
}
