pub mod client;
pub mod decode;
pub mod error;
pub mod memory;
#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;
pub mod source;

pub use client::{StreamClient, StreamMessage, StreamOffset};
pub use decode::decode_event;
pub use error::StreamError;
pub use memory::InMemoryStreamClient;
#[cfg(feature = "rabbitmq")]
pub use rabbitmq::RabbitMqStreamClient;
pub use source::StreamEventSource;
