use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use radar_domain::{DeviceUpdate, DEFAULT_PARTITION};
use radar_kv::{KvError, KvStore};

use crate::error::IdentityError;
use crate::hash::hash_metadata;
use crate::key::{keys_for_update, IdentityKey, IdentityKind};

const DEFAULT_CAS_RETRIES: usize = 3;

// ── Stored record ─────────────────────────────────────────────────────────────

/// What lives under an identity key: the canonical device this identity
/// resolves to, guarded by the metadata hash for CAS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub canonical_device_id: String,
    pub partition: String,
    pub metadata_hash: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// A successful lookup: the record plus which key kind resolved it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub record: IdentityRecord,
    pub resolved_via: IdentityKind,
}

// ── Identity map ──────────────────────────────────────────────────────────────

/// Deterministic keying over device identities with CAS-safe updates.
/// Writes are linearizable per key (delegated to the bucket); the map itself
/// holds no state.
pub struct IdentityMap {
    store: Arc<dyn KvStore>,
    max_cas_retries: usize,
}

impl IdentityMap {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        IdentityMap { store, max_cas_retries: DEFAULT_CAS_RETRIES }
    }

    pub fn with_retries(store: Arc<dyn KvStore>, max_cas_retries: usize) -> Self {
        IdentityMap { store, max_cas_retries }
    }

    /// Derive all applicable keys for `update` and publish the canonical
    /// device id under each of them.
    pub async fn publish(&self, update: &DeviceUpdate) -> Result<(), IdentityError> {
        let canonical_id = update.canonical_device_id();
        let partition = update
            .partition
            .as_ref()
            .map_or(DEFAULT_PARTITION, |p| p.as_str())
            .to_string();
        let hash = hash_metadata(&update.metadata, &update.ip, update.mac.as_deref());

        for key in keys_for_update(update) {
            match self
                .publish_key(&key, canonical_id.as_str(), &partition, &hash)
                .await
            {
                Ok(()) => {
                    counter!("identitymap_kv_publish_total", "outcome" => "ok").increment(1);
                }
                Err(err) => {
                    counter!("identitymap_kv_publish_total", "outcome" => "error").increment(1);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// The CAS write protocol for a single key: no-op when the stored record
    /// already carries this hash and canonical id, otherwise a
    /// revision-guarded write with bounded retries.
    async fn publish_key(
        &self,
        key: &IdentityKey,
        canonical_device_id: &str,
        partition: &str,
        metadata_hash: &str,
    ) -> Result<(), IdentityError> {
        let path = key.key_path();

        for attempt in 0..self.max_cas_retries {
            let current = self.store.get_entry(&path).await?;
            let record = IdentityRecord {
                canonical_device_id: canonical_device_id.to_string(),
                partition: partition.to_string(),
                metadata_hash: metadata_hash.to_string(),
                updated_at: Utc::now(),
                attributes: HashMap::new(),
            };

            let result = match &current {
                Some(entry) => {
                    match serde_json::from_slice::<IdentityRecord>(&entry.value) {
                        Ok(stored)
                            if stored.metadata_hash == metadata_hash
                                && stored.canonical_device_id == canonical_device_id =>
                        {
                            return Ok(());
                        }
                        Ok(_) => {}
                        Err(err) => {
                            // Unreadable record: replace it, the identity map
                            // must converge rather than wedge.
                            warn!(path, error = %err, "replacing unreadable identity record");
                        }
                    }
                    let body = Bytes::from(serde_json::to_vec(&record)?);
                    self.store.update(&path, body, entry.revision).await
                }
                None => {
                    let body = Bytes::from(serde_json::to_vec(&record)?);
                    self.store.create(&path, body).await
                }
            };

            match result {
                Ok(_) => return Ok(()),
                Err(KvError::CasConflict { .. }) => {
                    counter!("identitymap_conflict_total", "reason" => "revision-mismatch")
                        .increment(1);
                    debug!(path, attempt, "identity CAS conflict, re-reading");
                }
                Err(err) => return Err(err.into()),
            }
        }

        counter!("identitymap_conflict_total", "reason" => "retry-exhaustion").increment(1);
        Err(IdentityError::RetryExhausted { key: path })
    }

    /// Resolve the first key that has a record, trying the sanitised path
    /// first and falling back to the legacy unsanitised path. A record found
    /// only under the legacy path is rewritten in place under the sanitised
    /// one.
    pub async fn lookup(
        &self,
        keys: &[IdentityKey],
    ) -> Result<Option<Resolution>, IdentityError> {
        let start = Instant::now();
        for key in keys {
            let variants = key.path_variants();

            if let Some(bytes) = self.store.get(&variants.sanitized).await? {
                let record = serde_json::from_slice(&bytes)?;
                self.observe_lookup(start, Some(key.kind), true);
                return Ok(Some(Resolution { record, resolved_via: key.kind }));
            }

            if variants.legacy != variants.sanitized {
                if let Some(bytes) = self.store.get(&variants.legacy).await? {
                    let record: IdentityRecord = serde_json::from_slice(&bytes)?;
                    if let Err(err) =
                        self.store.put(&variants.sanitized, bytes, None).await
                    {
                        warn!(
                            legacy = %variants.legacy,
                            error = %err,
                            "failed to migrate legacy identity record"
                        );
                    }
                    self.observe_lookup(start, Some(key.kind), true);
                    return Ok(Some(Resolution { record, resolved_via: key.kind }));
                }
            }
        }
        self.observe_lookup(start, None, false);
        Ok(None)
    }

    /// Administrative removal of an identity key. Ordinary processing never
    /// deletes identity records; this exists for tenant administrators only.
    /// Removes both the sanitised and the legacy path.
    pub async fn admin_delete(&self, key: &IdentityKey) -> Result<(), IdentityError> {
        let variants = key.path_variants();
        self.store.delete(&variants.sanitized).await?;
        if variants.legacy != variants.sanitized {
            self.store.delete(&variants.legacy).await?;
        }
        warn!(key = %key, "identity key deleted by administrator");
        Ok(())
    }

    fn observe_lookup(&self, start: Instant, via: Option<IdentityKind>, found: bool) {
        histogram!(
            "identitymap_lookup_latency_seconds",
            "resolved_via" => via.map_or("none", |k| k.as_str()),
            "found" => if found { "true" } else { "false" },
        )
        .record(start.elapsed().as_secs_f64());
    }
}
