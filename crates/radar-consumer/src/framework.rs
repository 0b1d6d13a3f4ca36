use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, Consumer},
    stream, AckKind,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use metrics::counter;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ConsumerError;

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Stream to attach to; created on demand.
    pub stream: String,
    /// Tenant-scoped subject filter, e.g. `tenantA.events.>`.
    pub subjects: Vec<String>,
    pub durable_name: String,
    #[serde(default = "default_ack_wait", with = "radar_config::duration")]
    pub ack_wait: Duration,
    #[serde(default = "default_max_deliver")]
    pub max_deliver: i64,
    #[serde(default = "default_max_ack_pending")]
    pub max_ack_pending: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_fetch_timeout", with = "radar_config::duration")]
    pub fetch_timeout: Duration,
    /// Server-side redelivery delay attached to every Nak. Non-zero so a
    /// failing message never hot-loops between deliveries.
    #[serde(default = "default_nak_delay", with = "radar_config::duration")]
    pub nak_delay: Duration,
}

fn default_ack_wait() -> Duration {
    Duration::from_secs(30)
}
fn default_max_deliver() -> i64 {
    3
}
fn default_max_ack_pending() -> i64 {
    1000
}
fn default_batch_size() -> usize {
    10
}
fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_nak_delay() -> Duration {
    Duration::from_secs(1)
}

// ── Handler surface ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub subject: String,
    pub payload: Bytes,
    /// How many times the broker has delivered this message, this attempt
    /// included.
    pub delivered: i64,
}

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: &InboundMessage) -> anyhow::Result<()>;
}

// ── Dispatch decision ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled: acknowledge.
    Ack,
    /// Failed with deliveries remaining: negative-ack for redelivery.
    Nak,
    /// Failed on the final permitted delivery: acknowledge anyway so the
    /// stream is never stuck behind a poison message.
    PoisonAck,
}

/// Pure ack/nak decision, separated from broker I/O.
pub fn decide(succeeded: bool, delivered: i64, max_deliver: i64) -> Disposition {
    if succeeded {
        Disposition::Ack
    } else if delivered >= max_deliver {
        Disposition::PoisonAck
    } else {
        Disposition::Nak
    }
}

// ── Consumer loop ─────────────────────────────────────────────────────────────

/// Durable pull consumer with explicit ack. At-least-once delivery up to
/// `max_deliver`; permanent failures are dropped with an explicit ack.
pub struct JetStreamConsumer {
    config: ConsumerConfig,
    handler: Arc<dyn MessageHandler>,
}

impl JetStreamConsumer {
    pub fn new(config: ConsumerConfig, handler: Arc<dyn MessageHandler>) -> Self {
        JetStreamConsumer { config, handler }
    }

    async fn ensure_consumer(
        &self,
        client: async_nats::Client,
    ) -> Result<Consumer<pull::Config>, ConsumerError> {
        let js = jetstream::new(client);
        let stream = js
            .get_or_create_stream(stream::Config {
                name: self.config.stream.clone(),
                subjects: self.config.subjects.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| ConsumerError::Setup(e.to_string()))?;

        stream
            .get_or_create_consumer(
                &self.config.durable_name,
                pull::Config {
                    durable_name: Some(self.config.durable_name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait,
                    max_deliver: self.config.max_deliver,
                    max_ack_pending: self.config.max_ack_pending,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ConsumerError::Setup(e.to_string()))
    }

    /// Fetch-dispatch loop. Returns after `ctx` is cancelled, once the
    /// in-flight batch has drained.
    pub async fn run(
        &self,
        client: async_nats::Client,
        ctx: CancellationToken,
    ) -> Result<(), ConsumerError> {
        let consumer = self.ensure_consumer(client).await?;
        info!(
            stream = %self.config.stream,
            durable = %self.config.durable_name,
            "consumer loop starting"
        );

        loop {
            let fetch = consumer
                .fetch()
                .max_messages(self.config.batch_size)
                .expires(self.config.fetch_timeout)
                .messages();

            let batch = tokio::select! {
                _ = ctx.cancelled() => break,
                batch = fetch => batch,
            };

            match batch {
                Ok(mut messages) => {
                    // Finish the in-flight batch even if cancellation lands
                    // mid-way; the loop condition handles the exit.
                    while let Some(next) = messages.next().await {
                        match next {
                            Ok(message) => self.dispatch(message).await,
                            Err(err) => {
                                warn!(error = %err, "error reading fetched batch");
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "fetch failed, backing off");
                    tokio::select! {
                        _ = ctx.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }

            if ctx.is_cancelled() {
                break;
            }
        }

        info!(durable = %self.config.durable_name, "consumer loop stopped");
        Ok(())
    }

    async fn dispatch(&self, message: jetstream::Message) {
        let delivered = message.info().map(|i| i.delivered).unwrap_or(1);
        let inbound = InboundMessage {
            subject: message.subject.to_string(),
            payload: message.payload.clone(),
            delivered,
        };

        let outcome = self.handler.handle(&inbound).await;
        if let Err(err) = &outcome {
            debug!(subject = %inbound.subject, delivered, error = %err, "handler failed");
        }

        match decide(outcome.is_ok(), delivered, self.config.max_deliver) {
            Disposition::Ack => {
                if let Err(err) = message.ack().await {
                    warn!(subject = %inbound.subject, error = %err, "ack failed");
                }
            }
            Disposition::Nak => {
                if let Err(err) = message
                    .ack_with(AckKind::Nak(Some(self.config.nak_delay)))
                    .await
                {
                    warn!(subject = %inbound.subject, error = %err, "nak failed");
                }
            }
            Disposition::PoisonAck => {
                error!(
                    subject = %inbound.subject,
                    delivered,
                    "dropping poison message after max deliveries"
                );
                counter!("poison_pill_total", "stream" => self.config.stream.clone())
                    .increment(1);
                if let Err(err) = message.ack().await {
                    warn!(subject = %inbound.subject, error = %err, "poison ack failed");
                }
            }
        }
    }
}
