pub mod ingest;
pub mod manager;
pub mod ring;
pub mod service;
pub mod typed;

pub use ingest::{LatencyPayload, MetricKind, MetricsIngest};
pub use manager::{MetricPoint, MetricsConfig, MetricsManager};
pub use ring::RingBuffer;
pub use service::{CleanupConfig, StaleCleanupService};
pub use typed::{
    CpuUsage, DiskUsage, MemoryUsage, RperfSample, RperfStore, SampleStore, SnmpCounterSample,
    SnmpStore, SysmonSnapshot, SysmonStore,
};
