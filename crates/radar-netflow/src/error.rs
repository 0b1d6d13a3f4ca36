use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("flow record does not decode with any framing offset")]
    UnmarshalFlow,

    #[error("invalid ip length for {field}: {len} bytes")]
    InvalidIpLength { field: &'static str, len: usize },

    #[error("persistence failure: {0}")]
    Store(String),
}
