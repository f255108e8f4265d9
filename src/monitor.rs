//! # Discovery Monitor
//!
//! Long-running consumer loop for one queue.
//!
//! Each received message is decoded, reconciled and then acknowledged or
//! left for redelivery depending on how the reconcile ended:
//!
//! | Outcome                         | Message                         |
//! |---------------------------------|---------------------------------|
//! | success (or nothing to do)      | acknowledged                    |
//! | undecodable / non-retryable     | dead-lettered, acknowledged     |
//! | retryable                       | left for redelivery             |
//! | fatal                           | left for redelivery, logged     |
//!
//! Messages in a batch are processed sequentially. On cancellation the loop
//! stops between messages; anything not yet acknowledged is redelivered by
//! the queue.

use crate::observability;
use crate::reconciler::{most_severe, ErrorClass, Reconciler};
use crate::source::{decode_message, DeadLetterSink, EventSource, QueueMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// What happened to a message after processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    /// Fully applied and removed from the queue
    Acknowledged,
    /// Undeliverable; forwarded to the dead-letter sink (if any) and removed
    Dropped,
    /// Not acknowledged; the queue redelivers it after the visibility timeout
    LeftForRedelivery,
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    /// Long-poll duration of a single receive
    pub receive_wait: Duration,
    /// Pause after a failed receive before polling again
    pub receive_error_delay: Duration,
}

pub struct DiscoveryMonitor {
    source: Arc<dyn EventSource>,
    reconciler: Arc<Reconciler>,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    settings: MonitorSettings,
}

impl std::fmt::Debug for DiscoveryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryMonitor")
            .field("source", &self.source.name())
            .field("dead_letter", &self.dead_letter.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DiscoveryMonitor {
    #[must_use]
    pub fn new(
        source: Arc<dyn EventSource>,
        reconciler: Arc<Reconciler>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            source,
            reconciler,
            dead_letter: None,
            settings,
        }
    }

    #[must_use]
    pub fn with_dead_letter(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter = Some(sink);
        self
    }

    /// Consume until `token` is cancelled
    pub async fn run(&self, token: CancellationToken) {
        info!(queue = self.source.name(), "Discovery monitor started");

        loop {
            if token.is_cancelled() {
                break;
            }

            let received = tokio::select! {
                () = token.cancelled() => break,
                result = self.source.receive(self.settings.receive_wait) => result,
            };

            match received {
                Ok(messages) => {
                    if messages.is_empty() {
                        continue;
                    }
                    observability::increment_messages_received(messages.len());
                    for message in &messages {
                        if token.is_cancelled() {
                            debug!(
                                queue = self.source.name(),
                                "Shutdown requested, leaving rest of batch for redelivery"
                            );
                            break;
                        }
                        self.process_message(message).await;
                    }
                }
                Err(e) => {
                    observability::increment_receive_errors();
                    warn!(
                        queue = self.source.name(),
                        error = %e,
                        delay_secs = self.settings.receive_error_delay.as_secs(),
                        "Receive failed, pausing before next poll"
                    );
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(self.settings.receive_error_delay) => {}
                    }
                }
            }
        }

        info!(queue = self.source.name(), "Discovery monitor stopped");
    }

    /// Decode, reconcile and settle a single message
    pub async fn process_message(&self, message: &QueueMessage) -> MessageDisposition {
        let span = info_span!(
            "monitor.message",
            message.id = %message.message_id,
            queue = self.source.name(),
        );

        async move {
            let events = match decode_message(&message.body) {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "Dropping undecodable message");
                    return self.drop_message(message, &e.to_string()).await;
                }
            };

            if events.is_empty() {
                debug!("Message carries no events");
            }

            let mut failures = Vec::new();
            for event in &events {
                if let Err(e) = self.reconciler.reconcile(event).await {
                    failures.push(e);
                }
            }

            let Some(failure) = most_severe(failures) else {
                return self.acknowledge(message, MessageDisposition::Acknowledged).await;
            };

            match failure.class() {
                ErrorClass::NonRetryable => {
                    warn!(error = %failure, "Dropping message that cannot succeed");
                    self.drop_message(message, &failure.to_string()).await
                }
                ErrorClass::Retryable => {
                    info!(error = %failure, "Leaving message for redelivery");
                    observability::increment_messages_redelivered();
                    MessageDisposition::LeftForRedelivery
                }
                ErrorClass::Fatal => {
                    error!(error = %failure, "Fatal reconcile error, leaving message for redelivery");
                    observability::increment_messages_redelivered();
                    MessageDisposition::LeftForRedelivery
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drop_message(&self, message: &QueueMessage, reason: &str) -> MessageDisposition {
        observability::increment_messages_poison();
        if let Some(sink) = &self.dead_letter {
            if let Err(e) = sink.forward(message, reason).await {
                observability::increment_dead_letter_errors();
                warn!(error = %e, "Dead-letter forward failed, dropping message anyway");
            }
        }
        self.acknowledge(message, MessageDisposition::Dropped).await
    }

    async fn acknowledge(
        &self,
        message: &QueueMessage,
        disposition: MessageDisposition,
    ) -> MessageDisposition {
        match self.source.acknowledge(message).await {
            Ok(()) => {
                observability::increment_messages_acknowledged();
                disposition
            }
            Err(e) => {
                // Redelivery replays an already-applied message, which is a no-op
                warn!(error = %e, "Acknowledge failed, message will be redelivered");
                MessageDisposition::LeftForRedelivery
            }
        }
    }
}
