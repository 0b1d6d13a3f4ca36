pub mod supervisor;

pub use supervisor::{Service, Supervisor, DEFAULT_SHUTDOWN_TIMEOUT};
