pub mod burst;
pub mod config;
pub mod kafka_producer;
pub mod kafka_source;
pub mod memory;
pub mod message;
pub mod source;

pub use config::{ConnectionConfig, OffsetReset};
pub use message::Message;
pub use source::{ConnectionError, SourceConnector, StreamSource, TransientError};
