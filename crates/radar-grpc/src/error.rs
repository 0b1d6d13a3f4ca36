use thiserror::Error;
use tonic::Status;

use radar_kv::KvError;

#[derive(Debug, Error)]
pub enum GrpcError {
    #[error("configuration error: {0}")]
    Config(#[from] radar_config::ConfigError),

    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("kv store error: {0}")]
    Store(#[from] KvError),
}

/// Map store failures onto canonical gRPC codes.
pub fn status_from_kv(err: KvError) -> Status {
    match &err {
        KvError::Closed => Status::unavailable(err.to_string()),
        KvError::CasConflict { .. } => Status::aborted(err.to_string()),
        KvError::InvalidKey(_) => Status::invalid_argument(err.to_string()),
        KvError::PutMany { .. } | KvError::Backend(_) => Status::internal(err.to_string()),
    }
}
