//! Consumer-side ingest: decodes checker payloads off the stream and feeds
//! the live stores. Subjects are tenant-scoped with the metric kind as the
//! trailing token, e.g. `tenantA.metrics.sysmon`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use radar_consumer::{InboundMessage, MessageHandler};

use crate::manager::{MetricPoint, MetricsManager};
use crate::typed::{RperfSample, RperfStore, SnmpCounterSample, SnmpStore, SysmonSnapshot, SysmonStore};

/// Wire form of a poller latency report.
#[derive(Debug, Clone, Deserialize)]
pub struct LatencyPayload {
    pub poller_id: String,
    #[serde(flatten)]
    pub point: MetricPoint,
}

/// Decoded metric kinds, dispatched on the subject's trailing token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Latency,
    Sysmon,
    Rperf,
    Snmp,
}

impl MetricKind {
    pub fn from_subject(subject: &str) -> Option<Self> {
        match subject.rsplit('.').next()? {
            "latency" => Some(MetricKind::Latency),
            "sysmon" => Some(MetricKind::Sysmon),
            "rperf" => Some(MetricKind::Rperf),
            "snmp" => Some(MetricKind::Snmp),
            _ => None,
        }
    }
}

/// Feeds the metrics manager and the typed stores from stream messages.
pub struct MetricsIngest {
    manager: Arc<MetricsManager>,
    sysmon: SysmonStore,
    rperf: RperfStore,
    snmp: SnmpStore,
}

impl MetricsIngest {
    pub fn new(manager: Arc<MetricsManager>, typed_retention: usize) -> Self {
        MetricsIngest {
            manager,
            sysmon: SysmonStore::new(typed_retention),
            rperf: RperfStore::new(typed_retention),
            snmp: SnmpStore::new(typed_retention),
        }
    }

    pub fn manager(&self) -> &MetricsManager {
        &self.manager
    }

    pub fn sysmon(&self) -> &SysmonStore {
        &self.sysmon
    }

    pub fn rperf(&self) -> &RperfStore {
        &self.rperf
    }

    pub fn snmp(&self) -> &SnmpStore {
        &self.snmp
    }

    pub fn ingest(&self, kind: MetricKind, payload: &[u8]) -> Result<(), serde_json::Error> {
        match kind {
            MetricKind::Latency => {
                let latency: LatencyPayload = serde_json::from_slice(payload)?;
                self.manager.add_metric(&latency.poller_id, latency.point);
            }
            MetricKind::Sysmon => {
                let snapshot: SysmonSnapshot = serde_json::from_slice(payload)?;
                let host = snapshot.host_id.clone();
                self.sysmon.add(&host, snapshot);
            }
            MetricKind::Rperf => {
                let sample: RperfSample = serde_json::from_slice(payload)?;
                let target = sample.target.clone();
                self.rperf.add(&target, sample);
            }
            MetricKind::Snmp => {
                let sample: SnmpCounterSample = serde_json::from_slice(payload)?;
                let device = sample.device_id.clone();
                self.snmp.add(&device, sample);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for MetricsIngest {
    async fn handle(&self, message: &InboundMessage) -> anyhow::Result<()> {
        let Some(kind) = MetricKind::from_subject(&message.subject) else {
            // Unknown kinds are permanent failures; let max-deliver drop them.
            anyhow::bail!("unrecognised metric subject: {}", message.subject);
        };
        self.ingest(kind, &message.payload)?;
        debug!(subject = %message.subject, "metric ingested");
        Ok(())
    }
}
