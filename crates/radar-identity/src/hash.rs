use std::collections::BTreeMap;
use std::collections::HashMap;

use sha2::{Digest, Sha256};

use radar_domain::normalize_mac;

use crate::key::{
    META_ARMIS_DEVICE_ID, META_INTEGRATION_ID, META_INTEGRATION_TYPE, META_NETBOX_DEVICE_ID,
};

/// The canonical-field subset that participates in the metadata hash.
/// Everything else (port-scan payloads, alternate-ip annotations, hostnames,
/// timestamps) is observational jitter and must not destabilise the hash.
const CANONICAL_META_KEYS: [&str; 4] = [
    META_ARMIS_DEVICE_ID,
    META_INTEGRATION_ID,
    META_INTEGRATION_TYPE,
    META_NETBOX_DEVICE_ID,
];

/// SHA-256 over the canonical-field subset of an update: the four external
/// identifier keys plus `ip` and the uppercased `mac`. Pairs are fed in
/// lexicographic key order, key and value each terminated by NUL, the whole
/// sequence terminated by 0xFF, so insertion order never changes the digest.
pub fn hash_metadata(metadata: &HashMap<String, String>, ip: &str, mac: Option<&str>) -> String {
    let mut canonical: BTreeMap<&str, String> = BTreeMap::new();
    for key in CANONICAL_META_KEYS {
        if let Some(value) = metadata.get(key) {
            if !value.is_empty() {
                canonical.insert(key, value.clone());
            }
        }
    }
    if !ip.is_empty() {
        canonical.insert("ip", ip.to_string());
    }
    if let Some(mac) = mac.and_then(normalize_mac) {
        canonical.insert("mac", mac);
    }

    let mut hasher = Sha256::new();
    for (key, value) in &canonical {
        hasher.update(key.as_bytes());
        hasher.update([0x00]);
        hasher.update(value.as_bytes());
        hasher.update([0x00]);
    }
    hasher.update([0xFF]);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_under_any_insertion_order() {
        let mut forward = HashMap::new();
        forward.insert(META_ARMIS_DEVICE_ID.to_string(), "armis-1".to_string());
        forward.insert(META_INTEGRATION_TYPE.to_string(), "netbox".to_string());
        forward.insert(META_INTEGRATION_ID.to_string(), "7".to_string());

        let mut reverse = HashMap::new();
        reverse.insert(META_INTEGRATION_ID.to_string(), "7".to_string());
        reverse.insert(META_INTEGRATION_TYPE.to_string(), "netbox".to_string());
        reverse.insert(META_ARMIS_DEVICE_ID.to_string(), "armis-1".to_string());

        assert_eq!(
            hash_metadata(&forward, "1.2.3.4", Some("aa:bb:cc:dd:ee:ff")),
            hash_metadata(&reverse, "1.2.3.4", Some("aa:bb:cc:dd:ee:ff")),
        );
    }

    #[test]
    fn noise_keys_do_not_affect_the_hash() {
        let mut clean = HashMap::new();
        clean.insert(META_ARMIS_DEVICE_ID.to_string(), "armis-1".to_string());

        let mut noisy = clean.clone();
        noisy.insert("open_ports".to_string(), "22,80,443".to_string());
        noisy.insert("alternate_ips".to_string(), "[\"10.0.0.2\"]".to_string());
        noisy.insert("hostname".to_string(), "db-7".to_string());
        noisy.insert("last_scan".to_string(), "2026-07-01T00:00:00Z".to_string());

        assert_eq!(
            hash_metadata(&clean, "1.2.3.4", None),
            hash_metadata(&noisy, "1.2.3.4", None),
        );
    }

    #[test]
    fn mac_is_uppercased_before_hashing() {
        let meta = HashMap::new();
        assert_eq!(
            hash_metadata(&meta, "1.2.3.4", Some("aa:bb:cc:dd:ee:ff")),
            hash_metadata(&meta, "1.2.3.4", Some("AA:BB:CC:DD:EE:FF")),
        );
    }

    #[test]
    fn identity_fields_do_change_the_hash() {
        let mut a = HashMap::new();
        a.insert(META_ARMIS_DEVICE_ID.to_string(), "armis-1".to_string());
        let mut b = HashMap::new();
        b.insert(META_ARMIS_DEVICE_ID.to_string(), "armis-2".to_string());

        assert_ne!(
            hash_metadata(&a, "1.2.3.4", None),
            hash_metadata(&b, "1.2.3.4", None),
        );
        assert_ne!(
            hash_metadata(&a, "1.2.3.4", None),
            hash_metadata(&a, "1.2.3.5", None),
        );
    }

    #[test]
    fn empty_values_are_treated_as_absent() {
        let mut with_empty = HashMap::new();
        with_empty.insert(META_ARMIS_DEVICE_ID.to_string(), String::new());
        assert_eq!(
            hash_metadata(&with_empty, "1.2.3.4", None),
            hash_metadata(&HashMap::new(), "1.2.3.4", None),
        );
    }
}
