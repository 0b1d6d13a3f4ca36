use thiserror::Error;

use radar_domain::SweepResult;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("empty message body")]
    EmptyMessage,

    #[error("message decodes as neither sweep result nor device update")]
    Unmarshal,

    #[error("persistence failure: {0}")]
    Store(String),

    #[error("identity publish failure: {0}")]
    Identity(#[from] radar_identity::IdentityError),
}

/// A batch that stopped at a decode failure. `decoded` is the persisted
/// prefix; `failed_index` points at the message the caller should nak.
#[derive(Debug, Error)]
#[error("batch failed at message {failed_index}: {source}")]
pub struct BatchError {
    pub decoded: Vec<SweepResult>,
    pub failed_index: usize,
    #[source]
    pub source: ProcessorError,
}
