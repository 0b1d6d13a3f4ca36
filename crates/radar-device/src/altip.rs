use std::collections::HashMap;

use tracing::warn;

/// Metadata key holding the JSON-encoded list of alternate IPs.
pub const ALTERNATE_IPS_KEY: &str = "alternate_ips";

/// Decode an `alternate_ips` metadata value. The canonical form is a JSON
/// string array; the legacy comma-separated form is still accepted on read
/// and rewritten as JSON on the next write.
pub fn parse_alternate_ips(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return vec![];
    }
    if let Ok(list) = serde_json::from_str::<Vec<String>>(raw) {
        return dedup_preserving_order(list);
    }
    dedup_preserving_order(
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

/// Encode as the canonical JSON form.
pub fn encode_alternate_ips(ips: &[String]) -> String {
    serde_json::to_string(ips).unwrap_or_else(|err| {
        // Strings cannot fail JSON encoding; keep the metadata readable anyway.
        warn!(error = %err, "alternate_ips encoding failed");
        "[]".to_string()
    })
}

/// Add one IP to the encoded list in `metadata`. Idempotent, and commutative
/// up to ordering: the resulting set is insertion-ordered and duplicate-free.
pub fn add_alternate_ip(metadata: &mut HashMap<String, String>, ip: &str) {
    let mut ips = metadata
        .get(ALTERNATE_IPS_KEY)
        .map(|raw| parse_alternate_ips(raw))
        .unwrap_or_default();
    if !ips.iter().any(|existing| existing == ip) {
        ips.push(ip.to_string());
    }
    metadata.insert(ALTERNATE_IPS_KEY.to_string(), encode_alternate_ips(&ips));
}

fn dedup_preserving_order(list: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    list.into_iter().filter(|ip| seen.insert(ip.clone())).collect()
}
