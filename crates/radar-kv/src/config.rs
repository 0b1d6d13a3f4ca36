use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::KvError;
use crate::store::KvStore;

/// Typed view over a watched configuration key: decodes every committed JSON
/// value into `T` and exposes the latest via a `tokio::sync::watch` channel.
/// `None` means the key is absent. Undecodable values are logged and skipped
/// so a bad write never tears down every subscriber.
pub struct ConfigWatcher;

impl ConfigWatcher {
    pub async fn subscribe<T>(
        store: Arc<dyn KvStore>,
        key: &str,
        ctx: CancellationToken,
    ) -> Result<watch::Receiver<Option<T>>, KvError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let initial = match store.get(key).await? {
            Some(bytes) => decode::<T>(key, &bytes),
            None => None,
        };
        let (tx, rx) = watch::channel(initial);

        let mut updates = store.watch(key).await?;
        let key = key.to_string();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = ctx.cancelled() => break,
                    event = updates.recv() => event,
                };
                match event {
                    Some(Some(bytes)) => {
                        if let Some(value) = decode::<T>(&key, &bytes) {
                            if tx.send(Some(value)).is_err() {
                                break;
                            }
                        }
                    }
                    Some(None) => {
                        if tx.send(None).is_err() {
                            break;
                        }
                    }
                    None => {
                        error!(key, "config watch closed by backend");
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, error = %err, "skipping undecodable config value");
            None
        }
    }
}
