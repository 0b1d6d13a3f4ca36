use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use radar_config::{SecurityConfig, SecurityMode};
use radar_lifecycle::Service;

use crate::error::ConsumerError;
use crate::framework::JetStreamConsumer;

// ── Broker connection ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub url: String,
    #[serde(default)]
    pub security: SecurityConfig,
}

pub async fn connect_broker(config: &BrokerConfig) -> Result<async_nats::Client, ConsumerError> {
    let security = config
        .security
        .clone()
        .validate()
        .map_err(|e| ConsumerError::Connect(e.to_string()))?;

    let mut options = async_nats::ConnectOptions::new();
    if security.mode == SecurityMode::Mtls {
        options = options
            .require_tls(true)
            .add_root_certificates(security.tls.ca_file.clone())
            .add_client_certificate(
                security.tls.cert_file.clone(),
                security.tls.key_file.clone(),
            );
    }
    options
        .connect(&config.url)
        .await
        .map_err(|e| ConsumerError::Connect(e.to_string()))
}

// ── Service wrapper ───────────────────────────────────────────────────────────

/// One durable consumer loop as a supervised service: connects on start,
/// runs until cancellation, drains the connection on stop.
pub struct ConsumerService {
    name: String,
    broker: BrokerConfig,
    consumer: JetStreamConsumer,
}

impl ConsumerService {
    pub fn new(name: impl Into<String>, broker: BrokerConfig, consumer: JetStreamConsumer) -> Self {
        ConsumerService { name: name.into(), broker, consumer }
    }
}

#[async_trait::async_trait]
impl Service for ConsumerService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, ctx: CancellationToken) -> anyhow::Result<()> {
        let client = connect_broker(&self.broker).await?;
        info!(service = %self.name, url = %self.broker.url, "broker connected");
        self.consumer.run(client, ctx).await?;
        Ok(())
    }
}
