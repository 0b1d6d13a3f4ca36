pub mod client;
pub mod error;
pub mod identity;
pub mod server;

pub mod proto {
    tonic::include_proto!("kv.v1");
}

pub use client::{is_terminal, KvClient, KvClientConfig, WatchClient};
pub use error::GrpcError;
pub use identity::{AuthInterceptor, CallerIdentity};
pub use server::{KvGrpcServer, KvGrpcService, KvServerConfig};
