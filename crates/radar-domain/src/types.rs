use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Partition assumed when a discovery source reports none.
pub const DEFAULT_PARTITION: &str = "default";

/// Reserved prefix for service-component device ids. Never collides with a
/// discovered network device because `:` cannot appear in a partition name.
pub const SERVICE_ID_PREFIX: &str = "serviceradar";

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(s: impl Into<String>) -> Self {
        DeviceId(s.into())
    }

    /// Canonical id for a network device: `<partition>:<ip>`.
    pub fn for_network_device(partition: &str, ip: &str) -> Self {
        let partition = if partition.is_empty() { DEFAULT_PARTITION } else { partition };
        DeviceId(format!("{}:{}", partition, ip))
    }

    /// Canonical id for a service component: `serviceradar:<service_type>:<service_id>`.
    pub fn for_service(service_type: &str, service_id: &str) -> Self {
        DeviceId(format!("{}:{}:{}", SERVICE_ID_PREFIX, service_type, service_id))
    }

    pub fn is_service_component(&self) -> bool {
        self.0
            .strip_prefix(SERVICE_ID_PREFIX)
            .map_or(false, |rest| rest.starts_with(':'))
    }

    /// Split a `<partition>:<ip>` id into its parts. Returns `None` for
    /// service-component ids and ids without a partition separator.
    pub fn partition_and_ip(&self) -> Option<(&str, &str)> {
        if self.is_service_component() {
            return None;
        }
        self.0.split_once(':')
    }

    /// Split a `serviceradar:<service_type>:<service_id>` id into its type
    /// and id. Returns `None` for network-device ids.
    pub fn service_parts(&self) -> Option<(&str, &str)> {
        let rest = self.0.strip_prefix(SERVICE_ID_PREFIX)?.strip_prefix(':')?;
        rest.split_once(':')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition(pub String);

impl Partition {
    pub fn new(s: impl Into<String>) -> Self {
        Partition(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Partition {
    fn default() -> Self {
        Partition(DEFAULT_PARTITION.to_string())
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Discovery sources ─────────────────────────────────────────────────────────

/// A producer of device sightings. Each source carries a default confidence
/// used when an update does not state its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    Snmp,
    Mapper,
    Integration,
    Armis,
    Netbox,
    Netflow,
    Sweep,
    #[serde(rename = "self-reported")]
    SelfReported,
    Manual,
    Sysmon,
    Serviceradar,
    Unknown,
}

impl DiscoverySource {
    /// Confidence assumed for updates that do not carry one. Manual entries
    /// outrank everything; unknown sources rank below all known producers.
    pub fn default_confidence(&self) -> u8 {
        match self {
            DiscoverySource::Snmp => 9,
            DiscoverySource::Mapper => 8,
            DiscoverySource::Integration => 7,
            DiscoverySource::Armis => 7,
            DiscoverySource::Netbox => 7,
            DiscoverySource::Netflow => 6,
            DiscoverySource::Sweep => 5,
            DiscoverySource::SelfReported => 8,
            DiscoverySource::Manual => 10,
            DiscoverySource::Sysmon => 6,
            DiscoverySource::Serviceradar => 8,
            DiscoverySource::Unknown => 1,
        }
    }
}

impl std::fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiscoverySource::Snmp => "snmp",
            DiscoverySource::Mapper => "mapper",
            DiscoverySource::Integration => "integration",
            DiscoverySource::Armis => "armis",
            DiscoverySource::Netbox => "netbox",
            DiscoverySource::Netflow => "netflow",
            DiscoverySource::Sweep => "sweep",
            DiscoverySource::SelfReported => "self-reported",
            DiscoverySource::Manual => "manual",
            DiscoverySource::Sysmon => "sysmon",
            DiscoverySource::Serviceradar => "serviceradar",
            DiscoverySource::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    #[default]
    Network,
    Service,
}

// ── Wire types ────────────────────────────────────────────────────────────────

/// A low-confidence sighting produced by any discovery source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    pub ip: String,
    pub source: DiscoverySource,
    pub agent_id: String,
    pub poller_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<Partition>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub is_available: bool,
    /// Confidence in [1,10]. None means the source default applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
}

impl DeviceUpdate {
    /// The confidence used for merging: explicit value or the source default.
    pub fn effective_confidence(&self) -> u8 {
        self.confidence
            .unwrap_or_else(|| self.source.default_confidence())
    }

    /// Canonical device id, synthesised from partition and ip when missing.
    pub fn canonical_device_id(&self) -> DeviceId {
        match &self.device_id {
            Some(id) => id.clone(),
            None => DeviceId::for_network_device(
                self.partition.as_ref().map_or(DEFAULT_PARTITION, |p| p.as_str()),
                &self.ip,
            ),
        }
    }
}

/// Internal canonical form used by the materialised-view pipeline. Superset of
/// [`DeviceUpdate`] with a single primary discovery source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    pub ip: String,
    pub discovery_source: DiscoverySource,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub poller_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<Partition>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
}

impl SweepResult {
    /// Lift a legacy [`DeviceUpdate`] into the canonical sweep form.
    pub fn from_update(u: DeviceUpdate) -> Self {
        SweepResult {
            device_id: u.device_id,
            ip: u.ip,
            discovery_source: u.source,
            agent_id: u.agent_id,
            poller_id: u.poller_id,
            partition: u.partition,
            timestamp: u.timestamp,
            hostname: u.hostname,
            mac: u.mac,
            metadata: u.metadata,
            available: u.is_available,
            confidence: u.confidence,
        }
    }

    pub fn canonical_device_id(&self) -> DeviceId {
        match &self.device_id {
            Some(id) => id.clone(),
            None => DeviceId::for_network_device(
                self.partition.as_ref().map_or(DEFAULT_PARTITION, |p| p.as_str()),
                &self.ip,
            ),
        }
    }

    /// View this sweep result as a device update for the unified-device merge.
    pub fn to_update(&self) -> DeviceUpdate {
        DeviceUpdate {
            device_id: Some(self.canonical_device_id()),
            ip: self.ip.clone(),
            source: self.discovery_source,
            agent_id: self.agent_id.clone(),
            poller_id: self.poller_id.clone(),
            partition: self.partition.clone(),
            timestamp: self.timestamp,
            hostname: self.hostname.clone(),
            mac: self.mac.clone(),
            metadata: self.metadata.clone(),
            is_available: self.available,
            confidence: self.confidence,
        }
    }
}

// ── MAC canonicalisation ──────────────────────────────────────────────────────

/// Canonicalise a MAC address to uppercase colon-separated form.
/// Accepts `aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff`, and bare hex.
/// Returns `None` for anything that is not 6 octets of hex.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let hex: String = raw
        .chars()
        .filter(|c| *c != ':' && *c != '-' && *c != '.')
        .collect();
    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let upper = hex.to_ascii_uppercase();
    let octets: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
    Some(octets.join(":"))
}
