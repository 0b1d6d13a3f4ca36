use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::KvError;

/// A committed value observed by a watcher. `None` is the delete sentinel:
/// consumers treat it as "key absent".
pub type WatchEvent = Option<Bytes>;

/// Single-consumer watch channel. Closes when the store is closed or the
/// backend watch terminates unrecoverably.
pub type WatchReceiver = mpsc::Receiver<WatchEvent>;

/// Capacity of each watcher's channel. A watcher that falls this far behind
/// is disconnected rather than blocking writers.
pub const WATCH_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub value: Bytes,
    /// Backend revision of the committed write. Monotonically increasing per
    /// bucket; the CAS predicate for [`KvStore::update`].
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Bytes,
}

impl KvPair {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        KvPair { key: key.into(), value: value.into() }
    }
}

/// Uniform key-value surface over the configuration/identity plane.
///
/// Cancellation follows Rust semantics: dropping a pending call abandons it,
/// and dropping a [`WatchReceiver`] tears down its producer.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Not-found is not an error.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError>;

    /// Like [`get`](Self::get) but exposes the revision needed to seed a CAS
    /// loop.
    async fn get_entry(&self, key: &str) -> Result<Option<KvEntry>, KvError>;

    /// `ttl = None` persists until deleted. Backends without per-key TTL
    /// apply their bucket-level TTL instead.
    async fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Best-effort ordered, not atomic: on first failure the remaining
    /// entries are not attempted and the error names the offending key.
    /// Duplicate keys within one call: last writer wins.
    async fn put_many(&self, entries: Vec<KvPair>, ttl: Option<Duration>)
        -> Result<(), KvError>;

    /// Succeeds only if the key is absent. Returns the new revision.
    async fn create(&self, key: &str, value: Bytes) -> Result<u64, KvError>;

    /// Succeeds only if the stored revision equals `revision`; otherwise
    /// [`KvError::CasConflict`]. Returns the new revision.
    async fn update(&self, key: &str, value: Bytes, revision: u64) -> Result<u64, KvError>;

    /// Not-found is not an error.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Lazy, infinite sequence of committed values for `key`, starting with
    /// the current value when one exists. Deletes emit the `None` sentinel.
    async fn watch(&self, key: &str) -> Result<WatchReceiver, KvError>;

    /// Idempotent. Releases connections and invalidates outstanding watches.
    async fn close(&self) -> Result<(), KvError>;
}
