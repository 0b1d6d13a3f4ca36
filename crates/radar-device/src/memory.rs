use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use radar_domain::{DeviceId, SweepResult, UnifiedDevice};

use crate::altip::{parse_alternate_ips, ALTERNATE_IPS_KEY};
use crate::error::ProcessorError;
use crate::processor::{DeviceQuerier, SweepResultStore};

#[derive(Default)]
struct Inner {
    devices: HashMap<DeviceId, UnifiedDevice>,
}

/// In-memory unified-device store: maintains the materialised per-field
/// provenance view by merging every persisted sweep result. Backs tests and
/// single-node deployments without a columnar store.
#[derive(Default)]
pub struct InMemoryDeviceStore {
    inner: Arc<RwLock<Inner>>,
    persist_calls: AtomicUsize,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn device(&self, id: &DeviceId) -> Option<UnifiedDevice> {
        self.inner.read().await.devices.get(id).cloned()
    }

    pub async fn device_by_ip(&self, ip: &str) -> Option<UnifiedDevice> {
        self.inner
            .read()
            .await
            .devices
            .values()
            .find(|d| d.ip == ip)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.devices.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of persist_batch invocations, for batching assertions.
    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SweepResultStore for InMemoryDeviceStore {
    async fn persist_batch(&self, results: &[SweepResult]) -> Result<(), ProcessorError> {
        self.persist_calls.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.inner.write().await;
        for sweep in results {
            let update = sweep.to_update();
            let id = sweep.canonical_device_id();
            match guard.devices.get_mut(&id) {
                Some(device) => device.apply_update(&update),
                None => {
                    guard.devices.insert(id, UnifiedDevice::from_update(&update));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceQuerier for InMemoryDeviceStore {
    async fn find_by_ips(&self, ips: &[String]) -> Result<Vec<UnifiedDevice>, ProcessorError> {
        let guard = self.inner.read().await;
        let matches = guard
            .devices
            .values()
            .filter(|device| {
                if ips.iter().any(|ip| *ip == device.ip) {
                    return true;
                }
                device
                    .metadata
                    .as_ref()
                    .and_then(|meta| meta.value.get(ALTERNATE_IPS_KEY))
                    .map_or(false, |raw| {
                        parse_alternate_ips(raw).iter().any(|alt| ips.contains(alt))
                    })
            })
            .cloned()
            .collect();
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use radar_domain::DiscoverySource;

    fn sweep(ip: &str, hostname: Option<&str>) -> SweepResult {
        SweepResult {
            device_id: None,
            ip: ip.to_string(),
            discovery_source: DiscoverySource::Sweep,
            agent_id: "a".to_string(),
            poller_id: "p".to_string(),
            partition: None,
            timestamp: Utc::now(),
            hostname: hostname.map(String::from),
            mac: None,
            metadata: HashMap::new(),
            available: true,
            confidence: None,
        }
    }

    #[tokio::test]
    async fn persists_and_merges_into_unified_view() {
        let store = InMemoryDeviceStore::new();
        store.persist_batch(&[sweep("10.0.0.1", None)]).await.unwrap();
        store
            .persist_batch(&[sweep("10.0.0.1", Some("host-a"))])
            .await
            .unwrap();

        assert_eq!(store.len().await, 1);
        let device = store.device_by_ip("10.0.0.1").await.unwrap();
        assert_eq!(device.hostname.unwrap().value, "host-a");
    }

    #[tokio::test]
    async fn finds_devices_by_alternate_ip() {
        let store = InMemoryDeviceStore::new();
        let mut s = sweep("10.0.0.1", None);
        s.metadata.insert(
            ALTERNATE_IPS_KEY.to_string(),
            r#"["172.16.0.9"]"#.to_string(),
        );
        store.persist_batch(&[s]).await.unwrap();

        let found = store
            .find_by_ips(&["172.16.0.9".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].ip, "10.0.0.1");
    }
}
