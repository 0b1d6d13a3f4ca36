use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("store is closed")]
    Closed,

    #[error("compare-and-set conflict on key {key}")]
    CasConflict { key: String },

    #[error("put_many failed at key {key}: {source}")]
    PutMany {
        key: String,
        #[source]
        source: Box<KvError>,
    },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl KvError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        KvError::Backend(err.to_string())
    }

    /// Whether a retry with the same arguments can reasonably succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, KvError::CasConflict { .. } | KvError::Backend(_))
    }
}
