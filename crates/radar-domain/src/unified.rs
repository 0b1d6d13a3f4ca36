use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, DeviceType, DeviceUpdate, DiscoverySource};

// ── Per-field provenance ──────────────────────────────────────────────────────

/// A field value together with the observation that produced it. Conflicting
/// updates are resolved by confidence, then recency, then source name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredField<T> {
    pub value: T,
    pub source: DiscoverySource,
    pub last_updated: DateTime<Utc>,
    pub confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poller_id: Option<String>,
}

impl<T> DiscoveredField<T> {
    pub fn new(value: T, update: &DeviceUpdate) -> Self {
        DiscoveredField {
            value,
            source: update.source,
            last_updated: update.timestamp,
            confidence: update.effective_confidence(),
            agent_id: Some(update.agent_id.clone()),
            poller_id: Some(update.poller_id.clone()),
        }
    }

    /// Whether an incoming observation beats the currently stored one.
    /// Strictly higher confidence wins; equal confidence, newer timestamp
    /// wins; identical timestamps, the lexicographically higher source wins.
    pub fn loses_to(&self, update: &DeviceUpdate) -> bool {
        let incoming = (
            update.effective_confidence(),
            update.timestamp,
            update.source.to_string(),
        );
        let current = (self.confidence, self.last_updated, self.source.to_string());
        incoming > current
    }
}

/// One entry per source that has ever observed the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySourceInfo {
    pub source: DiscoverySource,
    pub agent_id: String,
    pub poller_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub confidence: u8,
}

// ── Unified device ────────────────────────────────────────────────────────────

/// The materialised per-field-provenance view derived from all observations
/// of one canonical device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedDevice {
    pub device_id: DeviceId,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<DiscoveredField<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<DiscoveredField<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DiscoveredField<HashMap<String, String>>>,
    pub discovery_sources: Vec<DiscoverySourceInfo>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_available: bool,
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

impl UnifiedDevice {
    /// Materialise a device from its first observation.
    pub fn from_update(update: &DeviceUpdate) -> Self {
        let device_id = update.canonical_device_id();
        let (device_type, service_type) = match device_id.service_parts() {
            Some((service_type, _)) => (DeviceType::Service, Some(service_type.to_string())),
            None => (DeviceType::Network, None),
        };
        let mut device = UnifiedDevice {
            device_id,
            ip: update.ip.clone(),
            hostname: None,
            mac: None,
            metadata: None,
            discovery_sources: vec![],
            first_seen: update.timestamp,
            last_seen: update.timestamp,
            is_available: update.is_available,
            device_type,
            service_type,
        };
        device.apply_update(update);
        device
    }

    /// Merge one observation into the device. Field winners follow the
    /// confidence ordering of [`DiscoveredField::loses_to`]; `last_seen` is
    /// monotonically non-decreasing; a self-reported device is always
    /// available.
    pub fn apply_update(&mut self, update: &DeviceUpdate) {
        if let Some(hostname) = &update.hostname {
            if self.hostname.as_ref().map_or(true, |f| f.loses_to(update)) {
                self.hostname = Some(DiscoveredField::new(hostname.clone(), update));
            }
        }
        if let Some(mac) = &update.mac {
            if self.mac.as_ref().map_or(true, |f| f.loses_to(update)) {
                self.mac = Some(DiscoveredField::new(mac.clone(), update));
            }
        }
        if !update.metadata.is_empty()
            && self.metadata.as_ref().map_or(true, |f| f.loses_to(update))
        {
            self.metadata = Some(DiscoveredField::new(update.metadata.clone(), update));
        }

        self.record_source(update);

        if update.timestamp > self.last_seen {
            self.last_seen = update.timestamp;
            self.is_available = update.is_available;
        }
        if update.timestamp < self.first_seen {
            self.first_seen = update.timestamp;
        }
        // A device that reports itself is by definition reachable.
        if update.source == DiscoverySource::SelfReported {
            self.is_available = true;
        }
    }

    fn record_source(&mut self, update: &DeviceUpdate) {
        match self
            .discovery_sources
            .iter_mut()
            .find(|info| info.source == update.source)
        {
            Some(info) => {
                info.agent_id = update.agent_id.clone();
                info.poller_id = update.poller_id.clone();
                info.confidence = update.effective_confidence();
                if update.timestamp > info.last_seen {
                    info.last_seen = update.timestamp;
                }
                if update.timestamp < info.first_seen {
                    info.first_seen = update.timestamp;
                }
            }
            None => self.discovery_sources.push(DiscoverySourceInfo {
                source: update.source,
                agent_id: update.agent_id.clone(),
                poller_id: update.poller_id.clone(),
                first_seen: update.timestamp,
                last_seen: update.timestamp,
                confidence: update.effective_confidence(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Partition;
    use chrono::Duration;

    fn update(source: DiscoverySource, ts: DateTime<Utc>) -> DeviceUpdate {
        DeviceUpdate {
            device_id: None,
            ip: "192.168.1.1".to_string(),
            source,
            agent_id: "agent-1".to_string(),
            poller_id: "poller-1".to_string(),
            partition: Some(Partition::new("tenant-a")),
            timestamp: ts,
            hostname: None,
            mac: None,
            metadata: HashMap::new(),
            is_available: true,
            confidence: None,
        }
    }

    #[test]
    fn self_reported_device_is_forced_available() {
        let now = Utc::now();
        let mut u = update(DiscoverySource::SelfReported, now);
        u.is_available = false;
        let device = UnifiedDevice::from_update(&u);
        assert!(device.is_available);
    }

    #[test]
    fn higher_confidence_wins_hostname() {
        let now = Utc::now();
        let mut sweep = update(DiscoverySource::Sweep, now);
        sweep.hostname = Some("sweep-name".to_string());
        let mut device = UnifiedDevice::from_update(&sweep);

        // snmp (9) outranks sweep (5) even though the observation is older.
        let mut snmp = update(DiscoverySource::Snmp, now - Duration::seconds(60));
        snmp.hostname = Some("snmp-name".to_string());
        device.apply_update(&snmp);
        assert_eq!(device.hostname.as_ref().unwrap().value, "snmp-name");

        // A later sweep cannot displace it.
        let mut sweep2 = update(DiscoverySource::Sweep, now + Duration::seconds(60));
        sweep2.hostname = Some("sweep-name-2".to_string());
        device.apply_update(&sweep2);
        assert_eq!(device.hostname.as_ref().unwrap().value, "snmp-name");
    }

    #[test]
    fn equal_confidence_newer_timestamp_wins() {
        let now = Utc::now();
        let mut first = update(DiscoverySource::Sweep, now);
        first.hostname = Some("old".to_string());
        let mut device = UnifiedDevice::from_update(&first);

        let mut second = update(DiscoverySource::Sweep, now + Duration::seconds(1));
        second.hostname = Some("new".to_string());
        device.apply_update(&second);
        assert_eq!(device.hostname.as_ref().unwrap().value, "new");
    }

    #[test]
    fn identical_timestamps_higher_source_name_wins() {
        let now = Utc::now();
        // mapper and self-reported both default to confidence 8;
        // "self-reported" > "mapper" lexicographically.
        let mut mapper = update(DiscoverySource::Mapper, now);
        mapper.hostname = Some("from-mapper".to_string());
        let mut device = UnifiedDevice::from_update(&mapper);

        let mut selfrep = update(DiscoverySource::SelfReported, now);
        selfrep.hostname = Some("from-self".to_string());
        device.apply_update(&selfrep);
        assert_eq!(device.hostname.as_ref().unwrap().value, "from-self");

        // And the reverse order converges to the same winner.
        let mut device2 = UnifiedDevice::from_update(&selfrep);
        device2.apply_update(&mapper);
        assert_eq!(device2.hostname.as_ref().unwrap().value, "from-self");
    }

    #[test]
    fn last_seen_is_monotonic() {
        let now = Utc::now();
        let mut device = UnifiedDevice::from_update(&update(DiscoverySource::Sweep, now));

        let mut stale = update(DiscoverySource::Sweep, now - Duration::seconds(300));
        stale.is_available = false;
        device.apply_update(&stale);

        assert_eq!(device.last_seen, now);
        assert!(device.first_seen <= device.last_seen);
        // Availability tracks the newest observation, not the stale one.
        assert!(device.is_available);
    }

    #[test]
    fn discovery_sources_accumulate_per_source() {
        let now = Utc::now();
        let mut device = UnifiedDevice::from_update(&update(DiscoverySource::Sweep, now));
        device.apply_update(&update(DiscoverySource::Snmp, now));
        device.apply_update(&update(DiscoverySource::Sweep, now + Duration::seconds(5)));

        assert_eq!(device.discovery_sources.len(), 2);
        let sweep = device
            .discovery_sources
            .iter()
            .find(|s| s.source == DiscoverySource::Sweep)
            .unwrap();
        assert_eq!(sweep.last_seen, now + Duration::seconds(5));
        assert_eq!(sweep.first_seen, now);
    }

    #[test]
    fn service_component_gets_service_type() {
        let now = Utc::now();
        let mut u = update(DiscoverySource::Serviceradar, now);
        u.device_id = Some(DeviceId::for_service("kv", "kv-01"));
        let device = UnifiedDevice::from_update(&u);
        assert_eq!(device.device_type, DeviceType::Service);
        assert_eq!(device.service_type.as_deref(), Some("kv"));
    }

    #[test]
    fn network_device_has_no_service_type() {
        let device = UnifiedDevice::from_update(&update(DiscoverySource::Sweep, Utc::now()));
        assert_eq!(device.device_type, DeviceType::Network);
        assert!(device.service_type.is_none());
    }
}
