pub mod altip;
pub mod error;
pub mod memory;
pub mod processor;


pub use altip::{add_alternate_ip, encode_alternate_ips, parse_alternate_ips, ALTERNATE_IPS_KEY};
pub use error::{BatchError, ProcessorError};
pub use memory::InMemoryDeviceStore;
pub use processor::{DeviceProcessor, DeviceQuerier, ProcessorConfig, SweepResultStore};
