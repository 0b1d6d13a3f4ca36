use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};

use crate::error::KvError;
use crate::store::{KvEntry, KvPair, KvStore, WatchEvent, WatchReceiver, WATCH_CHANNEL_CAPACITY};

struct Entry {
    value: Bytes,
    revision: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    watchers: HashMap<String, Vec<mpsc::Sender<WatchEvent>>>,
    /// Bucket-wide revision counter, like a stream sequence.
    revision: u64,
    closed: bool,
}

impl Inner {
    fn notify(&mut self, key: &str, event: WatchEvent) {
        if let Some(senders) = self.watchers.get_mut(key) {
            // A watcher with a full or dropped channel is disconnected;
            // writers never block on slow consumers.
            senders.retain(|tx| tx.try_send(event.clone()).is_ok());
            if senders.is_empty() {
                self.watchers.remove(key);
            }
        }
    }
}

/// In-memory implementation of [`KvStore`].
///
/// All data is lost on process exit. Suitable for tests and single-node
/// deployments without a broker.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError> {
        Ok(self.get_entry(key).await?.map(|e| e.value))
    }

    async fn get_entry(&self, key: &str) -> Result<Option<KvEntry>, KvError> {
        let guard = self.inner.read().await;
        if guard.closed {
            return Err(KvError::Closed);
        }
        let now = Instant::now();
        Ok(guard
            .entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| KvEntry { value: e.value.clone(), revision: e.revision }))
    }

    async fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut guard = self.inner.write().await;
        if guard.closed {
            return Err(KvError::Closed);
        }
        guard.revision += 1;
        let revision = guard.revision;
        guard.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                revision,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        guard.notify(key, Some(value));
        Ok(())
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
        let mut guard = self.inner.write().await;
        if guard.closed {
            return Err(KvError::Closed);
        }
        let now = Instant::now();
        if guard.entries.get(key).map_or(false, |e| !e.is_expired(now)) {
            return Err(KvError::CasConflict { key: key.to_string() });
        }
        guard.revision += 1;
        let revision = guard.revision;
        guard.entries.insert(
            key.to_string(),
            Entry { value: value.clone(), revision, expires_at: None },
        );
        guard.notify(key, Some(value));
        Ok(revision)
    }

    async fn update(&self, key: &str, value: Bytes, revision: u64) -> Result<u64, KvError> {
        let mut guard = self.inner.write().await;
        if guard.closed {
            return Err(KvError::Closed);
        }
        let now = Instant::now();
        let current = guard
            .entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.revision)
            .unwrap_or(0);
        if current != revision {
            return Err(KvError::CasConflict { key: key.to_string() });
        }
        guard.revision += 1;
        let next = guard.revision;
        guard.entries.insert(
            key.to_string(),
            Entry { value: value.clone(), revision: next, expires_at: None },
        );
        guard.notify(key, Some(value));
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut guard = self.inner.write().await;
        if guard.closed {
            return Err(KvError::Closed);
        }
        if guard.entries.remove(key).is_some() {
            guard.notify(key, None);
        }
        Ok(())
    }

    async fn watch(&self, key: &str) -> Result<WatchReceiver, KvError> {
        let mut guard = self.inner.write().await;
        if guard.closed {
            return Err(KvError::Closed);
        }
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        // Seed with the current value so late subscribers converge without
        // waiting for the next write.
        let now = Instant::now();
        if let Some(entry) = guard.entries.get(key).filter(|e| !e.is_expired(now)) {
            let _ = tx.try_send(Some(entry.value.clone()));
        }
        guard.watchers.entry(key.to_string()).or_default().push(tx);
        Ok(rx)
    }

    async fn close(&self) -> Result<(), KvError> {
        let mut guard = self.inner.write().await;
        guard.closed = true;
        // Dropping the senders closes every outstanding watch channel.
        guard.watchers.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_key_is_not_an_error() {
        let store = MemoryKvStore::new();
        assert!(store.get("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryKvStore::new();
        store.put("k", Bytes::from_static(b"v"), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap(), Bytes::from_static(b"v"));
    }

    #[tokio::test]
    async fn revisions_increase_per_write() {
        let store = MemoryKvStore::new();
        store.put("k", Bytes::from_static(b"v1"), None).await.unwrap();
        let first = store.get_entry("k").await.unwrap().unwrap().revision;
        store.put("k", Bytes::from_static(b"v2"), None).await.unwrap();
        let second = store.get_entry("k").await.unwrap().unwrap().revision;
        assert!(second > first);
    }

    #[tokio::test]
    async fn create_fails_on_existing_key() {
        let store = MemoryKvStore::new();
        store.create("k", Bytes::from_static(b"v")).await.unwrap();
        let err = store.create("k", Bytes::from_static(b"w")).await.unwrap_err();
        assert!(matches!(err, KvError::CasConflict { .. }));
    }

    #[tokio::test]
    async fn update_enforces_revision_predicate() {
        let store = MemoryKvStore::new();
        let rev = store.create("k", Bytes::from_static(b"v1")).await.unwrap();

        // Two independent writers race on the same revision: exactly one
        // commits, the other sees a conflict.
        let ok = store.update("k", Bytes::from_static(b"v2"), rev).await;
        let conflict = store.update("k", Bytes::from_static(b"v3"), rev).await;
        assert!(ok.is_ok());
        assert!(matches!(conflict.unwrap_err(), KvError::CasConflict { .. }));
        assert_eq!(store.get("k").await.unwrap().unwrap(), Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn delete_missing_key_is_not_an_error() {
        let store = MemoryKvStore::new();
        store.delete("absent").await.unwrap();
    }

    #[tokio::test]
    async fn watch_sees_puts_and_delete_sentinel() {
        let store = MemoryKvStore::new();
        let mut watch = store.watch("k").await.unwrap();

        store.put("k", Bytes::from_static(b"v1"), None).await.unwrap();
        store.delete("k").await.unwrap();

        assert_eq!(watch.recv().await.unwrap(), Some(Bytes::from_static(b"v1")));
        assert_eq!(watch.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn watch_seeds_current_value() {
        let store = MemoryKvStore::new();
        store.put("k", Bytes::from_static(b"existing"), None).await.unwrap();
        let mut watch = store.watch("k").await.unwrap();
        assert_eq!(
            watch.recv().await.unwrap(),
            Some(Bytes::from_static(b"existing"))
        );
    }

    #[tokio::test]
    async fn close_invalidates_watches_and_is_idempotent() {
        let store = MemoryKvStore::new();
        let mut watch = store.watch("k").await.unwrap();
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(watch.recv().await.is_none());
        assert!(matches!(store.get("k").await.unwrap_err(), KvError::Closed));
    }

    #[tokio::test]
    async fn put_many_reports_offending_key() {
        let store = MemoryKvStore::new();
        store.close().await.unwrap();
        let err = store
            .put_many(
                vec![KvPair::new("a", Bytes::from_static(b"1"))],
                None,
            )
            .await
            .unwrap_err();
        match err {
            KvError::PutMany { key, .. } => assert_eq!(key, "a"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn put_many_duplicate_keys_last_writer_wins() {
        let store = MemoryKvStore::new();
        store
            .put_many(
                vec![
                    KvPair::new("k", Bytes::from_static(b"first")),
                    KvPair::new("k", Bytes::from_static(b"second")),
                ],
                None,
            )
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap(), Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let store = MemoryKvStore::new();
        store
            .put("k", Bytes::from_static(b"v"), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }
}
