//! The message-source abstraction consumed by stream workers.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::config::ConnectionConfig;
use crate::message::Message;

/// Errors that prevent a source from being used at all. A worker hitting one
/// of these gives up instead of retrying.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid connection config: {0}")]
    InvalidConfig(String),
    #[error("broker at {endpoints} is unreachable: {reason}")]
    Unreachable { endpoints: String, reason: String },
    #[error("failed to create kafka client: {0}")]
    Client(#[from] KafkaError),
}

/// A recoverable hiccup while polling. Callers are expected to back off and poll again.
#[derive(Debug, Error)]
pub enum TransientError {
    #[error("kafka error while polling: {0}")]
    Broker(#[from] KafkaError),
    #[error("stream temporarily unavailable: {0}")]
    Unavailable(String),
}

/// Opens sessions with a broker. One connector can serve many workers; each
/// call to `connect` yields an independent source.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn StreamSource>, ConnectionError>;
}

/// A session subscribed to a single stream, owned by exactly one worker.
///
/// Every message returned by `poll` counts as consumed: the source takes care of
/// committing progress, so after a restart a message may be delivered again but
/// never skipped.
#[async_trait]
pub trait StreamSource: Send {
    /// Register interest in `stream`. Calling it again with the same name is a no-op.
    fn subscribe(&mut self, stream: &str) -> Result<(), ConnectionError>;

    /// Wait up to `timeout` for the next message. `Ok(None)` means nothing arrived in time.
    ///
    /// The returned future is cancel-safe: dropping it before completion does not
    /// consume a message.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>, TransientError>;

    /// Release the session. Safe to call more than once.
    fn close(&mut self);
}

pub(crate) fn validate_stream_name(stream: &str) -> Result<(), ConnectionError> {
    if stream.trim().is_empty() {
        return Err(ConnectionError::InvalidConfig(
            "stream name must not be empty".to_owned(),
        ));
    }
    Ok(())
}
