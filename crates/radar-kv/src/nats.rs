use std::time::Duration;

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use radar_config::{SecurityConfig, SecurityMode};

use crate::error::KvError;
use crate::store::{KvEntry, KvPair, KvStore, WatchReceiver, WATCH_CHANNEL_CAPACITY};

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsKvConfig {
    pub url: String,
    pub bucket: String,
    /// Bucket-level TTL. JetStream KV has no per-key TTL; this is the only
    /// expiry the backend offers.
    #[serde(default, with = "radar_config::duration::option")]
    pub bucket_ttl: Option<Duration>,
    /// Number of revisions the bucket retains per key.
    #[serde(default = "default_history")]
    pub history: i64,
    #[serde(default)]
    pub security: SecurityConfig,
}

fn default_history() -> i64 {
    10
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// [`KvStore`] backed by a JetStream KV bucket. Strong consistency and
/// per-key linearizable CAS are delegated to the bucket.
pub struct NatsKvStore {
    client: async_nats::Client,
    bucket: kv::Store,
    shutdown: CancellationToken,
}

impl NatsKvStore {
    /// Connect to the broker and open (or create) the configured bucket.
    pub async fn connect(config: NatsKvConfig) -> Result<Self, KvError> {
        let security = config.security.clone().validate().map_err(KvError::backend)?;

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
        let client = options.connect(&config.url).await.map_err(KvError::backend)?;

        let js = jetstream::new(client.clone());
        let bucket = match js.get_key_value(&config.bucket).await {
            Ok(bucket) => bucket,
            Err(_) => js
                .create_key_value(kv::Config {
                    bucket: config.bucket.clone(),
                    history: config.history,
                    max_age: config.bucket_ttl.unwrap_or_default(),
                    ..Default::default()
                })
                .await
                .map_err(KvError::backend)?,
        };
        debug!(bucket = %config.bucket, url = %config.url, "kv bucket ready");

        Ok(NatsKvStore { client, bucket, shutdown: CancellationToken::new() })
    }

    /// Wrap an already-opened bucket. Used by services that share one broker
    /// connection across subsystems.
    pub fn from_bucket(client: async_nats::Client, bucket: kv::Store) -> Self {
        NatsKvStore { client, bucket, shutdown: CancellationToken::new() }
    }

    fn ensure_open(&self) -> Result<(), KvError> {
        if self.shutdown.is_cancelled() {
            return Err(KvError::Closed);
        }
        Ok(())
    }

    /// Distinguish a CAS conflict from a backend fault by re-reading the
    /// entry: if the stored revision no longer matches what the caller
    /// expected, another writer won the race.
    async fn classify_cas_failure(&self, key: &str, expected: u64) -> KvError {
        match self.bucket.entry(key).await {
            Ok(Some(entry)) if entry.revision != expected => {
                KvError::CasConflict { key: key.to_string() }
            }
            Ok(None) if expected != 0 => KvError::CasConflict { key: key.to_string() },
            Ok(_) => KvError::Backend(format!("update of key {key} failed without conflict")),
            Err(err) => KvError::backend(err),
        }
    }
}

#[async_trait]
impl KvStore for NatsKvStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError> {
        self.ensure_open()?;
        self.bucket.get(key).await.map_err(KvError::backend)
    }

    async fn get_entry(&self, key: &str) -> Result<Option<KvEntry>, KvError> {
        self.ensure_open()?;
        let entry = self.bucket.entry(key).await.map_err(KvError::backend)?;
        Ok(entry.and_then(|e| match e.operation {
            kv::Operation::Put => Some(KvEntry { value: e.value, revision: e.revision }),
            kv::Operation::Delete | kv::Operation::Purge => None,
        }))
    }

    async fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), KvError> {
        self.ensure_open()?;
        if ttl.is_some() {
            // JetStream KV has no per-key TTL; the bucket's max_age applies.
            debug!(key, "per-key ttl ignored by jetstream backend");
        }
        self.bucket.put(key, value).await.map(|_| ()).map_err(KvError::backend)
    }

    async fn put_many(
        &self,
        entries: Vec<KvPair>,
        ttl: Option<Duration>,
    ) -> Result<(), KvError> {
        for pair in entries {
            self.put(&pair.key, pair.value, ttl)
                .await
                .map_err(|e| KvError::PutMany { key: pair.key.clone(), source: Box::new(e) })?;
        }
        Ok(())
    }

    async fn create(&self, key: &str, value: Bytes) -> Result<u64, KvError> {
        self.ensure_open()?;
        match self.bucket.create(key, value).await {
            Ok(revision) => Ok(revision),
            Err(_) => Err(self.classify_cas_failure(key, 0).await),
        }
    }

    async fn update(&self, key: &str, value: Bytes, revision: u64) -> Result<u64, KvError> {
        self.ensure_open()?;
        match self.bucket.update(key, value, revision).await {
            Ok(next) => Ok(next),
            Err(_) => Err(self.classify_cas_failure(key, revision).await),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.ensure_open()?;
        self.bucket.purge(key).await.map_err(KvError::backend)
    }

    async fn watch(&self, key: &str) -> Result<WatchReceiver, KvError> {
        self.ensure_open()?;
        // History-seeded watch: the latest committed value arrives first, so
        // a reconnecting client converges without waiting for the next write.
        let mut watcher = self
            .bucket
            .watch_with_history(key)
            .await
            .map_err(KvError::backend)?;

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let shutdown = self.shutdown.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = watcher.next() => match next {
                        Some(Ok(entry)) => {
                            let event = match entry.operation {
                                kv::Operation::Put => Some(entry.value),
                                kv::Operation::Delete | kv::Operation::Purge => None,
                            };
                            if tx.send(event).await.is_err() {
                                // Consumer dropped the receiver.
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(key, error = %err, "kv watch error, closing channel");
                            break;
                        }
                        None => {
                            debug!(key, "kv watch stream ended");
                            break;
                        }
                    },
                }
            }
        });
        Ok(rx)
    }

    async fn close(&self) -> Result<(), KvError> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        self.shutdown.cancel();
        self.client.flush().await.map_err(KvError::backend)?;
        Ok(())
    }
}
