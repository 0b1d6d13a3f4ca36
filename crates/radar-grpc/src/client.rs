use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tonic::Code;
use tracing::{debug, info, warn};

use radar_config::{SecurityConfig, SecurityMode};

use crate::error::GrpcError;
use crate::proto::kv_service_client::KvServiceClient;
use crate::proto::{
    DeleteRequest, GetRequest, KeyValueEntry, PutManyRequest, PutRequest, WatchRequest,
};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

// ── Error classification ──────────────────────────────────────────────────────

/// Codes after which a watch must not be retried. Everything else, including
/// a clean end-of-stream, is transient.
pub fn is_terminal(code: Code) -> bool {
    matches!(
        code,
        Code::Cancelled
            | Code::DeadlineExceeded
            | Code::PermissionDenied
            | Code::Unauthenticated
            | Code::InvalidArgument
            | Code::FailedPrecondition
            | Code::Unimplemented
    )
}

/// Doubling backoff capped at [`MAX_BACKOFF`].
pub(crate) fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct KvClientConfig {
    /// e.g. `https://kv.serviceradar.internal:50051`
    pub endpoint: String,
    #[serde(default)]
    pub security: SecurityConfig,
}

async fn connect(config: &KvClientConfig) -> Result<KvServiceClient<Channel>, GrpcError> {
    let mut endpoint =
        Endpoint::from_shared(config.endpoint.clone()).map_err(GrpcError::Transport)?;

    let security = config.security.clone().validate()?;
    if security.mode == SecurityMode::Mtls {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|source| GrpcError::Io {
                path: path.display().to_string(),
                source,
            })
        };
        let mut tls = ClientTlsConfig::new()
            .identity(Identity::from_pem(
                read(&security.tls.cert_file)?,
                read(&security.tls.key_file)?,
            ))
            .ca_certificate(Certificate::from_pem(read(&security.tls.ca_file)?));
        if let Some(server_name) = &security.server_name {
            tls = tls.domain_name(server_name.clone());
        }
        endpoint = endpoint.tls_config(tls)?;
    }

    let channel = endpoint.connect().await?;
    Ok(KvServiceClient::new(channel))
}

// ── Unary client ──────────────────────────────────────────────────────────────

/// Thin wrapper over the unary KV RPCs for services that read and write
/// configuration. Watching goes through [`WatchClient`].
pub struct KvClient {
    inner: KvServiceClient<Channel>,
}

impl KvClient {
    pub async fn connect(config: &KvClientConfig) -> Result<Self, GrpcError> {
        Ok(KvClient { inner: connect(config).await? })
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<Bytes>, tonic::Status> {
        let response = self
            .inner
            .get(GetRequest { key: key.to_string() })
            .await?
            .into_inner();
        Ok(response.found.then(|| Bytes::from(response.value)))
    }

    pub async fn put(
        &mut self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), tonic::Status> {
        self.inner
            .put(PutRequest {
                key: key.to_string(),
                value: value.to_vec(),
                ttl_seconds: ttl.map_or(0, |d| d.as_secs() as i64),
            })
            .await?;
        Ok(())
    }

    pub async fn put_many(
        &mut self,
        entries: Vec<(String, Bytes)>,
        ttl: Option<Duration>,
    ) -> Result<(), tonic::Status> {
        self.inner
            .put_many(PutManyRequest {
                entries: entries
                    .into_iter()
                    .map(|(key, value)| KeyValueEntry { key, value: value.to_vec() })
                    .collect(),
                ttl_seconds: ttl.map_or(0, |d| d.as_secs() as i64),
            })
            .await?;
        Ok(())
    }

    pub async fn delete(&mut self, key: &str) -> Result<(), tonic::Status> {
        self.inner
            .delete(DeleteRequest { key: key.to_string() })
            .await?;
        Ok(())
    }
}

// ── Watch client ──────────────────────────────────────────────────────────────

/// Long-lived watch wrapper that transparently reconnects the server stream.
///
/// Emission is at-least-once per committed write: a reconnect re-emits the
/// latest value (the server seeds new subscriptions with it) but never an
/// out-of-order older one. Nothing is emitted after `ctx` is cancelled.
pub struct WatchClient {
    config: KvClientConfig,
}

impl WatchClient {
    pub fn new(config: KvClientConfig) -> Self {
        WatchClient { config }
    }

    /// Watch `key` until a terminal error or cancellation. Values arrive on
    /// the returned channel; the delete sentinel is `None`.
    pub fn watch(&self, key: String, ctx: CancellationToken) -> mpsc::Receiver<Option<Bytes>> {
        let (tx, rx) = mpsc::channel(1);
        let client = WatchClient { config: self.config.clone() };
        tokio::spawn(async move {
            client.watch_loop(key, ctx, tx).await;
        });
        rx
    }

    async fn watch_loop(
        &self,
        key: String,
        ctx: CancellationToken,
        tx: mpsc::Sender<Option<Bytes>>,
    ) {
        let mut backoff = INITIAL_BACKOFF;

        'reconnect: loop {
            if ctx.is_cancelled() {
                break;
            }

            let mut client = match connect(&self.config).await {
                Ok(client) => client,
                Err(err) => {
                    warn!(key, error = %err, "watch connect failed");
                    if !self.sleep_backoff(&ctx, &mut backoff).await {
                        break;
                    }
                    continue;
                }
            };

            let stream = tokio::select! {
                _ = ctx.cancelled() => break,
                result = client.watch(WatchRequest { key: key.clone() }) => result,
            };
            let mut stream = match stream {
                Ok(response) => response.into_inner(),
                Err(status) => {
                    if is_terminal(status.code()) {
                        info!(key, code = ?status.code(), "watch terminated");
                        break;
                    }
                    warn!(key, code = ?status.code(), "watch call failed, will retry");
                    if !self.sleep_backoff(&ctx, &mut backoff).await {
                        break;
                    }
                    continue;
                }
            };
            debug!(key, "watch stream established");

            loop {
                let message = tokio::select! {
                    _ = ctx.cancelled() => break 'reconnect,
                    message = stream.message() => message,
                };
                match message {
                    Ok(Some(response)) => {
                        // Every successful receive resets the backoff window.
                        backoff = INITIAL_BACKOFF;
                        let event = if response.value.is_empty() {
                            None
                        } else {
                            Some(Bytes::from(response.value))
                        };
                        let sent = tokio::select! {
                            _ = ctx.cancelled() => break 'reconnect,
                            sent = tx.send(event) => sent,
                        };
                        if sent.is_err() {
                            // Consumer dropped the receiver.
                            break 'reconnect;
                        }
                    }
                    Ok(None) => {
                        // EOF is transient: the server went away mid-stream.
                        warn!(key, "watch stream ended, reconnecting");
                        if !self.sleep_backoff(&ctx, &mut backoff).await {
                            break 'reconnect;
                        }
                        continue 'reconnect;
                    }
                    Err(status) => {
                        if is_terminal(status.code()) {
                            info!(key, code = ?status.code(), "watch terminated");
                            break 'reconnect;
                        }
                        warn!(key, code = ?status.code(), "watch receive failed, reconnecting");
                        if !self.sleep_backoff(&ctx, &mut backoff).await {
                            break 'reconnect;
                        }
                        continue 'reconnect;
                    }
                }
            }
        }
        debug!(key, "watch client closed");
    }

    /// Sleep the current backoff (doubling it for next time) unless the
    /// context is cancelled first. Returns false on cancellation.
    async fn sleep_backoff(&self, ctx: &CancellationToken, backoff: &mut Duration) -> bool {
        let wait = *backoff;
        *backoff = next_backoff(wait);
        tokio::select! {
            _ = ctx.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_codes_match_the_contract() {
        for code in [
            Code::Cancelled,
            Code::DeadlineExceeded,
            Code::PermissionDenied,
            Code::Unauthenticated,
            Code::InvalidArgument,
            Code::FailedPrecondition,
            Code::Unimplemented,
        ] {
            assert!(is_terminal(code), "{code:?} should be terminal");
        }
    }

    #[test]
    fn transient_codes_are_retried() {
        for code in [
            Code::Unavailable,
            Code::Internal,
            Code::Aborted,
            Code::ResourceExhausted,
            Code::Unknown,
        ] {
            assert!(!is_terminal(code), "{code:?} should be transient");
        }
    }

    #[test]
    fn backoff_doubles_to_the_cap() {
        let mut current = INITIAL_BACKOFF;
        let mut seen = vec![current];
        for _ in 0..6 {
            current = next_backoff(current);
            seen.push(current);
        }
        assert_eq!(
            seen.iter().map(|d| d.as_secs()).collect::<Vec<_>>(),
            vec![1, 2, 4, 8, 16, 30, 30]
        );
    }

    #[test]
    fn config_parses_with_default_security() {
        let config: KvClientConfig = serde_json::from_str(
            r#"{"endpoint": "https://kv.internal:50051"}"#,
        )
        .unwrap();
        assert_eq!(config.endpoint, "https://kv.internal:50051");
        assert_eq!(config.security.mode, radar_config::SecurityMode::None);
    }
}
