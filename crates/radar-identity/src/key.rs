use serde::{Deserialize, Serialize};

use radar_domain::{normalize_mac, DeviceUpdate, DEFAULT_PARTITION};

/// Root of the identity-map namespace in the KV bucket.
pub const KEY_BASE_PATH: &str = "device_canonical_map";

/// Metadata keys that carry external-inventory identifiers.
pub const META_ARMIS_DEVICE_ID: &str = "armis_device_id";
pub const META_INTEGRATION_ID: &str = "integration_id";
pub const META_INTEGRATION_TYPE: &str = "integration_type";
pub const META_NETBOX_DEVICE_ID: &str = "netbox_device_id";
/// Metadata keys with this prefix contribute alias device-id keys.
pub const META_ALIAS_DEVICE_ID_PREFIX: &str = "alias_device_id";

// ── Key kinds ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityKind {
    DeviceId,
    Ip,
    PartitionIp,
    Mac,
    ArmisId,
    NetboxId,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::DeviceId => "device-id",
            IdentityKind::Ip => "ip",
            IdentityKind::PartitionIp => "partition-ip",
            IdentityKind::Mac => "mac",
            IdentityKind::ArmisId => "armis-id",
            IdentityKind::NetboxId => "netbox-id",
        }
    }
}

impl std::fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Keys ──────────────────────────────────────────────────────────────────────

/// One identity under which a canonical device can be found.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub kind: IdentityKind,
    pub value: String,
}

impl IdentityKey {
    pub fn new(kind: IdentityKind, value: impl Into<String>) -> Self {
        IdentityKey { kind, value: value.into() }
    }

    /// Sanitised storage path: `device_canonical_map/<kind>/<sanitised-value>`.
    pub fn key_path(&self) -> String {
        format!("{}/{}/{}", KEY_BASE_PATH, self.kind, sanitize_key_path(&self.value))
    }

    /// Both the sanitised path and the legacy unsanitised one, so readers can
    /// migrate records written before sanitisation existed.
    pub fn path_variants(&self) -> KeyPathVariants {
        KeyPathVariants {
            sanitized: self.key_path(),
            legacy: format!("{}/{}/{}", KEY_BASE_PATH, self.kind, self.value),
        }
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPathVariants {
    pub sanitized: String,
    pub legacy: String,
}

// ── Sanitisation ──────────────────────────────────────────────────────────────

/// Replace every byte outside `[A-Za-z0-9._=-]` with `=HH` (upper hex), so
/// any identifier becomes a valid bucket key segment. `:` becomes `=3A`.
/// `=` is preserved, so an already-escaped `=HH` sequence is a fixed point
/// and sanitisation is idempotent.
pub fn sanitize_key_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' | b'=' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("={:02X}", other)),
        }
    }
    out
}

// ── Key derivation ────────────────────────────────────────────────────────────

/// All identity keys under which this update should be findable. Order is
/// strongest-first: device id, then network addresses, then external ids.
pub fn keys_for_update(update: &DeviceUpdate) -> Vec<IdentityKey> {
    let mut keys = Vec::new();

    let device_id = update.canonical_device_id();
    keys.push(IdentityKey::new(IdentityKind::DeviceId, device_id.as_str()));
    for (meta_key, alias) in &update.metadata {
        if meta_key.starts_with(META_ALIAS_DEVICE_ID_PREFIX) && !alias.is_empty() {
            keys.push(IdentityKey::new(IdentityKind::DeviceId, alias.clone()));
        }
    }

    if !update.ip.is_empty() {
        keys.push(IdentityKey::new(IdentityKind::Ip, update.ip.clone()));
        let partition = update
            .partition
            .as_ref()
            .map_or(DEFAULT_PARTITION, |p| p.as_str());
        keys.push(IdentityKey::new(
            IdentityKind::PartitionIp,
            format!("{}:{}", partition, update.ip),
        ));
    }

    if let Some(mac) = update.mac.as_deref().and_then(normalize_mac) {
        keys.push(IdentityKey::new(IdentityKind::Mac, mac));
    }

    if let Some(armis_id) = update.metadata.get(META_ARMIS_DEVICE_ID) {
        if !armis_id.is_empty() {
            keys.push(IdentityKey::new(IdentityKind::ArmisId, armis_id.clone()));
        }
    }
    if update.metadata.get(META_INTEGRATION_TYPE).map(String::as_str) == Some("netbox") {
        if let Some(integration_id) = update.metadata.get(META_INTEGRATION_ID) {
            if !integration_id.is_empty() {
                keys.push(IdentityKey::new(IdentityKind::NetboxId, integration_id.clone()));
            }
        }
    }
    if let Some(netbox_id) = update.metadata.get(META_NETBOX_DEVICE_ID) {
        if !netbox_id.is_empty() {
            keys.push(IdentityKey::new(IdentityKind::NetboxId, netbox_id.clone()));
        }
    }

    keys.dedup();
    keys
}
