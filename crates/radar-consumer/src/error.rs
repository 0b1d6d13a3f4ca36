use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("broker connection failed: {0}")]
    Connect(String),

    #[error("stream or consumer setup failed: {0}")]
    Setup(String),

    #[error("fetch failed: {0}")]
    Fetch(String),
}
