use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("invalid mac address: {0}")]
    InvalidMac(String),

    #[error("confidence out of range: {0} (expected 1..=10)")]
    ConfidenceOutOfRange(u8),
}
