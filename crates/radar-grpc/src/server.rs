use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};
use tonic::{Request, Response, Status};
use tracing::info;

use radar_config::{RbacConfig, SecurityConfig};
use radar_kv::{KvPair, KvStore};

use crate::error::{status_from_kv, GrpcError};
use crate::identity::{require_role, AuthInterceptor};
use crate::proto::kv_service_server::{KvService, KvServiceServer};
use crate::proto::{
    DeleteRequest, DeleteResponse, GetRequest, GetResponse, PutManyRequest, PutManyResponse,
    PutRequest, PutResponse, WatchRequest, WatchResponse,
};

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct KvServerConfig {
    pub listen_addr: SocketAddr,
    pub security: SecurityConfig,
    #[serde(default)]
    pub rbac: RbacConfig,
}

// ── Service ───────────────────────────────────────────────────────────────────

/// The KV plane exposed over gRPC. Authentication happens in
/// [`AuthInterceptor`]; each handler enforces its own role requirement.
pub struct KvGrpcService {
    store: Arc<dyn KvStore>,
}

impl KvGrpcService {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        KvGrpcService { store }
    }
}

fn ttl_from_seconds(ttl_seconds: i64) -> Option<Duration> {
    (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds as u64))
}

#[tonic::async_trait]
impl KvService for KvGrpcService {
    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetResponse>, Status> {
        require_role(request.extensions(), false)?;
        let req = request.into_inner();
        let response = match self.store.get(&req.key).await.map_err(status_from_kv)? {
            Some(value) => GetResponse { value: value.to_vec(), found: true },
            None => GetResponse { value: vec![], found: false },
        };
        Ok(Response::new(response))
    }

    async fn put(&self, request: Request<PutRequest>) -> Result<Response<PutResponse>, Status> {
        require_role(request.extensions(), true)?;
        let req = request.into_inner();
        self.store
            .put(&req.key, Bytes::from(req.value), ttl_from_seconds(req.ttl_seconds))
            .await
            .map_err(status_from_kv)?;
        Ok(Response::new(PutResponse {}))
    }

    async fn put_many(
        &self,
        request: Request<PutManyRequest>,
    ) -> Result<Response<PutManyResponse>, Status> {
        require_role(request.extensions(), true)?;
        let req = request.into_inner();
        let entries = req
            .entries
            .into_iter()
            .map(|e| KvPair::new(e.key, e.value))
            .collect();
        self.store
            .put_many(entries, ttl_from_seconds(req.ttl_seconds))
            .await
            .map_err(status_from_kv)?;
        Ok(Response::new(PutManyResponse {}))
    }

    async fn delete(
        &self,
        request: Request<DeleteRequest>,
    ) -> Result<Response<DeleteResponse>, Status> {
        require_role(request.extensions(), true)?;
        let req = request.into_inner();
        self.store.delete(&req.key).await.map_err(status_from_kv)?;
        Ok(Response::new(DeleteResponse {}))
    }

    type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchResponse, Status>> + Send + 'static>>;

    async fn watch(
        &self,
        request: Request<WatchRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        require_role(request.extensions(), false)?;
        let req = request.into_inner();
        let receiver = self.store.watch(&req.key).await.map_err(status_from_kv)?;

        // Deletes surface as the empty-value sentinel.
        let stream = ReceiverStream::new(receiver).map(|event| {
            Ok(WatchResponse { value: event.map(|b| b.to_vec()).unwrap_or_default() })
        });
        Ok(Response::new(Box::pin(stream)))
    }
}

// ── Serving ───────────────────────────────────────────────────────────────────

/// Serve the KV plane with mandatory mTLS until `ctx` is cancelled.
pub async fn serve(
    store: Arc<dyn KvStore>,
    config: KvServerConfig,
    ctx: CancellationToken,
) -> Result<(), GrpcError> {
    let security = config.security.validate()?;
    let tls = tls_config(&security)?;

    let rbac = Arc::new(config.rbac);
    let service = KvServiceServer::with_interceptor(
        KvGrpcService::new(store),
        AuthInterceptor::new(rbac),
    );

    info!(addr = %config.listen_addr, "kv grpc server listening");
    Server::builder()
        .tls_config(tls)?
        .add_service(service)
        .serve_with_shutdown(config.listen_addr, ctx.cancelled())
        .await?;
    info!("kv grpc server stopped");
    Ok(())
}

/// [`radar_lifecycle::Service`] wrapper: runs the server until shutdown and
/// closes the store (invalidating outstanding watches) on stop.
pub struct KvGrpcServer {
    store: Arc<dyn KvStore>,
    config: KvServerConfig,
}

impl KvGrpcServer {
    pub fn new(store: Arc<dyn KvStore>, config: KvServerConfig) -> Self {
        KvGrpcServer { store, config }
    }
}

#[async_trait::async_trait]
impl radar_lifecycle::Service for KvGrpcServer {
    fn name(&self) -> &str {
        "kv-grpc"
    }

    async fn start(&self, ctx: CancellationToken) -> anyhow::Result<()> {
        serve(self.store.clone(), self.config.clone(), ctx).await?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.store.close().await?;
        Ok(())
    }
}

fn tls_config(security: &SecurityConfig) -> Result<ServerTlsConfig, GrpcError> {
    let read = |path: &std::path::Path| {
        std::fs::read(path).map_err(|source| GrpcError::Io {
            path: path.display().to_string(),
            source,
        })
    };
    let cert = read(&security.tls.cert_file)?;
    let key = read(&security.tls.key_file)?;
    let client_ca = read(security.tls.effective_client_ca())?;

    Ok(ServerTlsConfig::new()
        .identity(Identity::from_pem(cert, key))
        .client_ca_root(Certificate::from_pem(client_ca)))
}
