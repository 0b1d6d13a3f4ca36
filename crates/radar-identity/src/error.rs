use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("kv store error: {0}")]
    Kv(#[from] radar_kv::KvError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CAS retries exhausted; the caller may retry the whole publish.
    #[error("conflict retries exhausted for key {key}")]
    RetryExhausted { key: String },
}

impl IdentityError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, IdentityError::RetryExhausted { .. })
            || matches!(self, IdentityError::Kv(e) if e.is_retriable())
    }
}
