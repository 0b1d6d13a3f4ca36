use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use radar_domain::{DeviceUpdate, Partition, SweepResult, UnifiedDevice};
use radar_identity::IdentityMap;

use crate::altip::{encode_alternate_ips, parse_alternate_ips, ALTERNATE_IPS_KEY};
use crate::error::{BatchError, ProcessorError};

// ── External collaborators ────────────────────────────────────────────────────

/// Read side of the unified-device store. The columnar store behind it is an
/// external collaborator; only this query surface is specified here.
#[async_trait]
pub trait DeviceQuerier: Send + Sync + 'static {
    /// Devices whose primary or alternate IPs intersect `ips`.
    async fn find_by_ips(&self, ips: &[String]) -> Result<Vec<UnifiedDevice>, ProcessorError>;
}

/// Write side: one persistence call per batch of canonical sweep results.
#[async_trait]
pub trait SweepResultStore: Send + Sync + 'static {
    async fn persist_batch(&self, results: &[SweepResult]) -> Result<(), ProcessorError>;
}

// ── Processor ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// Inherited by updates that omit their own agent id.
    pub agent_id: String,
    /// Inherited by updates that omit their own poller id.
    pub poller_id: String,
    #[serde(default)]
    pub partition: Option<String>,
}

/// Turns raw message bodies into canonical, enriched sweep results and
/// persists them. Owns a batch of messages only until the batch is acked.
pub struct DeviceProcessor {
    config: ProcessorConfig,
    querier: Arc<dyn DeviceQuerier>,
    store: Arc<dyn SweepResultStore>,
    identity: Option<Arc<IdentityMap>>,
}

impl DeviceProcessor {
    pub fn new(
        config: ProcessorConfig,
        querier: Arc<dyn DeviceQuerier>,
        store: Arc<dyn SweepResultStore>,
    ) -> Self {
        DeviceProcessor { config, querier, store, identity: None }
    }

    /// Also publish identity-map entries for every persisted result.
    pub fn with_identity_map(mut self, identity: Arc<IdentityMap>) -> Self {
        self.identity = Some(identity);
        self
    }

    // ── Decode ────────────────────────────────────────────────────────────────

    /// Two-step total decode: first the canonical SweepResult shape (accepted
    /// only when it carries an ip), then the legacy Device shape. The caller
    /// never introspects which variant matched.
    pub fn decode(&self, body: &[u8]) -> Result<SweepResult, ProcessorError> {
        if body.is_empty() {
            return Err(ProcessorError::EmptyMessage);
        }
        if let Ok(sweep) = serde_json::from_slice::<SweepResult>(body) {
            if !sweep.ip.is_empty() {
                return Ok(sweep);
            }
        }
        match serde_json::from_slice::<DeviceUpdate>(body) {
            Ok(update) if !update.ip.is_empty() => Ok(SweepResult::from_update(update)),
            _ => Err(ProcessorError::Unmarshal),
        }
    }

    fn apply_defaults(&self, sweep: &mut SweepResult) {
        if sweep.agent_id.is_empty() {
            sweep.agent_id = self.config.agent_id.clone();
        }
        if sweep.poller_id.is_empty() {
            sweep.poller_id = self.config.poller_id.clone();
        }
        if sweep.partition.is_none() {
            sweep.partition = self.config.partition.clone().map(Partition::new);
        }
        if sweep.device_id.is_none() {
            sweep.device_id = Some(sweep.canonical_device_id());
        }
        // Re-encode a legacy comma-separated list as JSON on this write.
        if let Some(raw) = sweep.metadata.get(ALTERNATE_IPS_KEY) {
            let parsed = parse_alternate_ips(raw);
            sweep
                .metadata
                .insert(ALTERNATE_IPS_KEY.to_string(), encode_alternate_ips(&parsed));
        }
    }

    // ── Alternate-IP enrichment ───────────────────────────────────────────────

    /// Union the primary and alternate IPs of every known device matching any
    /// of this sweep's IPs back into its `alternate_ips`, excluding the
    /// sweep's own primary. Failures are non-fatal: persistence proceeds with
    /// whatever the sweep already carried.
    async fn enrich_alternate_ips(&self, sweep: &mut SweepResult) {
        let mut known: Vec<String> = vec![sweep.ip.clone()];
        if let Some(raw) = sweep.metadata.get(ALTERNATE_IPS_KEY) {
            for ip in parse_alternate_ips(raw) {
                if !known.contains(&ip) {
                    known.push(ip);
                }
            }
        }

        let devices = match self.querier.find_by_ips(&known).await {
            Ok(devices) => devices,
            Err(err) => {
                warn!(ip = %sweep.ip, error = %err, "alternate-ip enrichment failed");
                return;
            }
        };

        let mut union = known;
        for device in &devices {
            if !union.contains(&device.ip) {
                union.push(device.ip.clone());
            }
            if let Some(meta) = &device.metadata {
                if let Some(raw) = meta.value.get(ALTERNATE_IPS_KEY) {
                    for ip in parse_alternate_ips(raw) {
                        if !union.contains(&ip) {
                            union.push(ip);
                        }
                    }
                }
            }
        }

        union.retain(|ip| ip != &sweep.ip);
        if union.is_empty() {
            sweep.metadata.remove(ALTERNATE_IPS_KEY);
        } else {
            debug!(ip = %sweep.ip, alternates = union.len(), "materialised alternate ips");
            sweep
                .metadata
                .insert(ALTERNATE_IPS_KEY.to_string(), encode_alternate_ips(&union));
        }
    }

    // ── Processing ────────────────────────────────────────────────────────────

    /// Decode, default, enrich, and persist a single message body.
    pub async fn process(&self, body: &[u8]) -> Result<SweepResult, ProcessorError> {
        let mut sweep = self.decode(body)?;
        self.apply_defaults(&mut sweep);
        self.enrich_alternate_ips(&mut sweep).await;
        self.store.persist_batch(std::slice::from_ref(&sweep)).await?;
        self.publish_identities(std::slice::from_ref(&sweep)).await?;
        Ok(sweep)
    }

    /// Decode every message first; on the first decode failure, persist the
    /// successfully decoded prefix and report the failing index so the caller
    /// can ack the successes and nak the failure. Persistence is one call for
    /// the whole batch.
    pub async fn process_batch(
        &self,
        bodies: &[impl AsRef<[u8]>],
    ) -> Result<Vec<SweepResult>, BatchError> {
        let mut decoded: Vec<SweepResult> = Vec::with_capacity(bodies.len());
        let mut failure: Option<(usize, ProcessorError)> = None;

        for (index, body) in bodies.iter().enumerate() {
            match self.decode(body.as_ref()) {
                Ok(mut sweep) => {
                    self.apply_defaults(&mut sweep);
                    decoded.push(sweep);
                }
                Err(err) => {
                    failure = Some((index, err));
                    break;
                }
            }
        }

        for sweep in &mut decoded {
            self.enrich_alternate_ips(sweep).await;
        }

        if !decoded.is_empty() {
            if let Err(err) = self.store.persist_batch(&decoded).await {
                let failed_index = failure.map_or(decoded.len(), |(i, _)| i);
                return Err(BatchError { decoded, failed_index, source: err });
            }
            if let Err(err) = self.publish_identities(&decoded).await {
                let failed_index = failure.map_or(decoded.len(), |(i, _)| i);
                return Err(BatchError {
                    decoded,
                    failed_index,
                    source: ProcessorError::Identity(err),
                });
            }
        }

        match failure {
            Some((failed_index, source)) => Err(BatchError { decoded, failed_index, source }),
            None => Ok(decoded),
        }
    }

    async fn publish_identities(
        &self,
        results: &[SweepResult],
    ) -> Result<(), radar_identity::IdentityError> {
        let Some(identity) = &self.identity else {
            return Ok(());
        };
        for sweep in results {
            identity.publish(&sweep.to_update()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl radar_consumer::MessageHandler for DeviceProcessor {
    async fn handle(&self, message: &radar_consumer::InboundMessage) -> anyhow::Result<()> {
        self.process(&message.payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDeviceStore;
    use bytes::Bytes;
    use chrono::Utc;
    use radar_domain::DiscoverySource;
    use std::collections::{HashMap, HashSet};

    fn processor(store: Arc<InMemoryDeviceStore>) -> DeviceProcessor {
        DeviceProcessor::new(
            ProcessorConfig {
                agent_id: "agent-default".to_string(),
                poller_id: "poller-default".to_string(),
                partition: Some("tenant-a".to_string()),
            },
            store.clone(),
            store,
        )
    }

    fn sweep_json(ip: &str, alternates: Option<&str>) -> Bytes {
        let mut metadata = HashMap::new();
        if let Some(alts) = alternates {
            metadata.insert(ALTERNATE_IPS_KEY.to_string(), alts.to_string());
        }
        let sweep = SweepResult {
            device_id: None,
            ip: ip.to_string(),
            discovery_source: DiscoverySource::Sweep,
            agent_id: String::new(),
            poller_id: String::new(),
            partition: None,
            timestamp: Utc::now(),
            hostname: None,
            mac: None,
            metadata,
            available: true,
            confidence: None,
        };
        Bytes::from(serde_json::to_vec(&sweep).unwrap())
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let store = Arc::new(InMemoryDeviceStore::new());
        let err = processor(store).process(b"").await.unwrap_err();
        assert!(matches!(err, ProcessorError::EmptyMessage));
    }

    #[tokio::test]
    async fn garbage_is_an_unmarshal_error() {
        let store = Arc::new(InMemoryDeviceStore::new());
        let err = processor(store).process(b"not json").await.unwrap_err();
        assert!(matches!(err, ProcessorError::Unmarshal));
    }

    #[tokio::test]
    async fn legacy_device_update_shape_is_accepted() {
        let store = Arc::new(InMemoryDeviceStore::new());
        let update = DeviceUpdate {
            device_id: None,
            ip: "10.1.1.1".to_string(),
            source: DiscoverySource::Snmp,
            agent_id: "a".to_string(),
            poller_id: "p".to_string(),
            partition: None,
            timestamp: Utc::now(),
            hostname: Some("sw-1".to_string()),
            mac: None,
            metadata: HashMap::new(),
            is_available: true,
            confidence: None,
        };
        let body = serde_json::to_vec(&update).unwrap();
        let sweep = processor(store).process(&body).await.unwrap();
        assert_eq!(sweep.discovery_source, DiscoverySource::Snmp);
        assert_eq!(sweep.ip, "10.1.1.1");
    }

    #[tokio::test]
    async fn defaults_are_inherited_from_config() {
        let store = Arc::new(InMemoryDeviceStore::new());
        let sweep = processor(store)
            .process(&sweep_json("10.1.1.2", None))
            .await
            .unwrap();
        assert_eq!(sweep.agent_id, "agent-default");
        assert_eq!(sweep.poller_id, "poller-default");
        assert_eq!(sweep.device_id.as_ref().unwrap().as_str(), "tenant-a:10.1.1.2");
    }

    #[tokio::test]
    async fn enrichment_unions_ips_of_matching_devices() {
        let store = Arc::new(InMemoryDeviceStore::new());
        let proc = processor(store.clone());

        // Existing device with primary 192.168.1.1 and two alternates.
        proc.process(&sweep_json(
            "192.168.1.1",
            Some(r#"["10.0.0.1","172.16.0.1"]"#),
        ))
        .await
        .unwrap();

        // New sweep shares 10.0.0.1: its alternates become the union minus
        // its own primary.
        let sweep = proc
            .process(&sweep_json("192.168.1.100", Some(r#"["10.0.0.1","172.16.0.1"]"#)))
            .await
            .unwrap();

        let alts: HashSet<String> =
            parse_alternate_ips(sweep.metadata.get(ALTERNATE_IPS_KEY).unwrap())
                .into_iter()
                .collect();
        let expected: HashSet<String> = ["192.168.1.1", "10.0.0.1", "172.16.0.1"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(alts, expected);
        assert!(!alts.contains("192.168.1.100"));
    }

    #[tokio::test]
    async fn legacy_comma_list_is_rewritten_as_json() {
        let store = Arc::new(InMemoryDeviceStore::new());
        let sweep = processor(store)
            .process(&sweep_json("10.2.2.2", Some("10.0.0.5,10.0.0.6")))
            .await
            .unwrap();
        let raw = sweep.metadata.get(ALTERNATE_IPS_KEY).unwrap();
        let parsed: Vec<String> = serde_json::from_str(raw).expect("JSON form");
        assert_eq!(parsed.len(), 2);
    }

    #[tokio::test]
    async fn batch_stops_at_first_decode_error_with_prefix_persisted() {
        let store = Arc::new(InMemoryDeviceStore::new());
        let proc = processor(store.clone());

        let bodies: Vec<Bytes> = vec![
            sweep_json("10.3.3.1", None),
            sweep_json("10.3.3.2", None),
            Bytes::from_static(b"garbage"),
            sweep_json("10.3.3.4", None),
        ];
        let err = proc.process_batch(&bodies).await.unwrap_err();
        assert_eq!(err.failed_index, 2);
        assert_eq!(err.decoded.len(), 2);
        assert!(matches!(err.source, ProcessorError::Unmarshal));

        // The prefix really was persisted; the tail after the failure wasn't.
        assert!(store.device_by_ip("10.3.3.1").await.is_some());
        assert!(store.device_by_ip("10.3.3.2").await.is_some());
        assert!(store.device_by_ip("10.3.3.4").await.is_none());
    }

    #[tokio::test]
    async fn clean_batch_is_persisted_in_one_call() {
        let store = Arc::new(InMemoryDeviceStore::new());
        let proc = processor(store.clone());
        let bodies: Vec<Bytes> = vec![sweep_json("10.4.4.1", None), sweep_json("10.4.4.2", None)];
        let results = proc.process_batch(&bodies).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(store.persist_calls(), 1);
    }
}
