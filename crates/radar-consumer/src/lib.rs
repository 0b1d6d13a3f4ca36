pub mod error;
pub mod framework;
pub mod service;
pub mod subjects;

pub use error::ConsumerError;
pub use framework::{
    decide, ConsumerConfig, Disposition, InboundMessage, JetStreamConsumer, MessageHandler,
};
pub use service::{connect_broker, BrokerConfig, ConsumerService};
pub use subjects::Subjects;
