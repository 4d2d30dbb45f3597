//! The consume loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::envelope::Message;
use crate::error::Result;
use crate::handler::HandlerRegistry;
use crate::transport::Consumer;

/// Timing knobs for [`MessageProcessor::run`].
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Longest single wait for a message.
    pub poll_timeout: Duration,
    /// Pause after a transport error before polling again.
    pub error_backoff: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A handler processed it.
    Handled,
    /// No handler matched, or the type could not be determined.
    Unroutable,
    /// The handler refused it as malformed or unknown.
    Skipped,
    /// The handler failed; the offset stays where it is.
    Retained,
}

impl Disposition {
    pub fn should_commit(&self) -> bool {
        !matches!(self, Disposition::Retained)
    }
}

/// Pulls messages from a [`Consumer`] and routes them through a
/// [`HandlerRegistry`].
///
/// Each message is handled in isolation: a failing handler affects only
/// its own message's offset.
pub struct MessageProcessor {
    registry: Arc<HandlerRegistry>,
    config: ProcessorConfig,
}

impl MessageProcessor {
    pub fn new(registry: Arc<HandlerRegistry>, config: ProcessorConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Routes one message to its handler.
    #[tracing::instrument(
        skip(self, message),
        fields(topic = %message.topic, partition = message.partition, offset = message.offset)
    )]
    pub async fn process(&self, message: &Message) -> Disposition {
        metrics::counter!("messages_consumed_total", "topic" => message.topic.clone()).increment(1);

        let Some(message_type) = message.message_type() else {
            tracing::warn!("message has no type; skipping");
            metrics::counter!("messages_unroutable_total").increment(1);
            return Disposition::Unroutable;
        };
        let Some(handler) = self.registry.handler_for(&message_type) else {
            tracing::warn!(%message_type, "no handler for message type; skipping");
            metrics::counter!("messages_unroutable_total").increment(1);
            return Disposition::Unroutable;
        };

        match handler.handle(message).await {
            Ok(()) => {
                tracing::debug!(%message_type, handler = handler.name(), "message handled");
                Disposition::Handled
            }
            Err(e) if e.is_retryable() => {
                tracing::error!(%message_type, handler = handler.name(), error = %e, "handler failed; leaving offset uncommitted");
                metrics::counter!("messages_failed_total").increment(1);
                Disposition::Retained
            }
            Err(e) => {
                tracing::warn!(%message_type, handler = handler.name(), error = %e, "message skipped");
                Disposition::Skipped
            }
        }
    }

    /// Runs until `shutdown` turns true or its sender is dropped.
    ///
    /// With an empty registry nothing is subscribed and the loop just waits
    /// for shutdown.
    pub async fn run<C>(&self, consumer: &mut C, mut shutdown: watch::Receiver<bool>) -> Result<()>
    where
        C: Consumer + ?Sized,
    {
        if self.registry.is_empty() {
            tracing::warn!("no message routes registered; consumer is idle");
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            return Ok(());
        }

        let topics = self.registry.topics();
        consumer.subscribe(&topics).await?;
        tracing::info!(?topics, "consumer subscribed");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                polled = consumer.poll(self.config.poll_timeout) => polled,
            };

            match polled {
                Ok(Some(message)) => {
                    if self.process(&message).await.should_commit()
                        && let Err(e) = consumer.commit(&message).await
                    {
                        tracing::error!(error = %e, topic = %message.topic, offset = message.offset, "offset commit failed");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "poll failed; backing off");
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!("consumer stopped");
        Ok(())
    }
}
