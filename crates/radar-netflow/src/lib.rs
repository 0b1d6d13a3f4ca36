pub mod decode;
pub mod error;
pub mod flow;
pub mod processor;

pub use decode::{decode_flow, validate_addresses, MAX_FRAMING_SKIP};
pub use error::FlowError;
pub use flow::FlowMessage;
pub use processor::{FlowWriter, NetflowMetric, NetflowProcessor};
