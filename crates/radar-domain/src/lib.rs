pub mod error;
pub mod types;
pub mod unified;

pub use error::DomainError;
pub use types::{
    normalize_mac, DeviceId, DeviceType, DeviceUpdate, DiscoverySource, Partition, SweepResult,
    DEFAULT_PARTITION, SERVICE_ID_PREFIX,
};
pub use unified::{DiscoveredField, DiscoverySourceInfo, UnifiedDevice};
