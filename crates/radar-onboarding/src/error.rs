use thiserror::Error;

#[derive(Debug, Error)]
pub enum OnboardingError {
    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("download token not found")]
    TokenNotFound,

    #[error("package signature mismatch")]
    SignatureMismatch,

    #[error("package {0} has expired")]
    Expired(String),

    #[error("package {0} is revoked")]
    Revoked(String),

    #[error("download token already consumed")]
    TokenConsumed,

    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("kv store error: {0}")]
    Kv(#[from] radar_kv::KvError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
