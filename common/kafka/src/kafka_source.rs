use std::time::Duration;

use async_trait::async_trait;
use rdkafka::{
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::{KafkaError, RDKafkaErrorCode},
    ClientConfig,
};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::message::Message;
use crate::source::{
    validate_stream_name, ConnectionError, SourceConnector, StreamSource, TransientError,
};

/// Connects `KafkaSource`s to a real cluster through librdkafka.
#[derive(Clone, Debug)]
pub struct KafkaConnector {
    connect_timeout: Duration,
}

impl KafkaConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn client_config(config: &ConnectionConfig) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("statistics.interval.ms", "10000")
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", config.offset_reset.as_str())
            // Offsets are stored by hand once a message has been handed out, and
            // librdkafka commits whatever is stored on its own schedule.
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                config.auto_commit_interval_ms.to_string(),
            )
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false");
        client_config
    }
}

impl Default for KafkaConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl SourceConnector for KafkaConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn StreamSource>, ConnectionError> {
        config.validate().map_err(ConnectionError::InvalidConfig)?;

        let client_config = Self::client_config(config);
        debug!("rdkafka configuration: {:?}", client_config);
        let consumer: StreamConsumer = client_config.create()?;

        // "Ping" the brokers by requesting metadata, creating the client alone
        // does not open a connection.
        let timeout = self.connect_timeout;
        let endpoints = config.bootstrap_servers();
        let probe = tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(None, timeout)
                .map(|metadata| (consumer, metadata.brokers().len()))
        })
        .await
        .map_err(|e| ConnectionError::Unreachable {
            endpoints: endpoints.clone(),
            reason: format!("metadata probe did not complete: {e}"),
        })?;

        let (consumer, brokers) = probe.map_err(|e| ConnectionError::Unreachable {
            endpoints: endpoints.clone(),
            reason: e.to_string(),
        })?;

        info!(
            endpoints = %endpoints,
            group = %config.group_id,
            brokers,
            "connected to kafka"
        );

        Ok(Box::new(KafkaSource {
            consumer: Some(consumer),
            subscribed: None,
        }))
    }
}

pub struct KafkaSource {
    consumer: Option<StreamConsumer>,
    subscribed: Option<String>,
}

impl KafkaSource {
    fn consumer(&self) -> Result<&StreamConsumer, TransientError> {
        self.consumer
            .as_ref()
            .ok_or_else(|| TransientError::Unavailable("source has been closed".to_owned()))
    }
}

#[async_trait]
impl StreamSource for KafkaSource {
    fn subscribe(&mut self, stream: &str) -> Result<(), ConnectionError> {
        validate_stream_name(stream)?;
        if self.subscribed.as_deref() == Some(stream) {
            return Ok(());
        }

        let consumer = self.consumer.as_ref().ok_or_else(|| {
            ConnectionError::InvalidConfig("cannot subscribe a closed source".to_owned())
        })?;
        consumer.subscribe(&[stream])?;
        self.subscribed = Some(stream.to_owned());
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>, TransientError> {
        let consumer = self.consumer()?;

        let received = match tokio::time::timeout(timeout, consumer.recv()).await {
            Err(_elapsed) => return Ok(None),
            Ok(Err(KafkaError::PartitionEOF(_))) => return Ok(None),
            Ok(Err(e)) => return Err(TransientError::Broker(e)),
            Ok(Ok(received)) => received,
        };

        let message = Message::from_kafka(&received);
        if let Err(e) = consumer.store_offset_from_message(&received) {
            // The message is still handed out; at worst it is redelivered after a restart.
            warn!(
                stream = %message.stream,
                partition = message.partition,
                offset = message.offset,
                "failed to store offset: {}",
                e
            );
        }

        Ok(Some(message))
    }

    fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            // Flush what has been stored before leaving the group, the next
            // member resumes from here.
            match consumer.commit_consumer_state(CommitMode::Sync) {
                Ok(()) => {}
                Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
                Err(e) => {
                    warn!(stream = ?self.subscribed, "failed to commit offsets on close: {}", e)
                }
            }
            consumer.unsubscribe();
            debug!(stream = ?self.subscribed, "kafka source closed");
        }
    }
}

impl Drop for KafkaSource {
    fn drop(&mut self) {
        self.close();
    }
}
