pub mod config;
pub mod error;
pub mod memory;
pub mod nats;
pub mod store;

pub use config::ConfigWatcher;
pub use error::KvError;
pub use memory::MemoryKvStore;
pub use nats::{NatsKvConfig, NatsKvStore};
pub use store::{KvEntry, KvPair, KvStore, WatchEvent, WatchReceiver};
