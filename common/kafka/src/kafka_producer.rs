use std::time::Duration;

use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::burst::BurstMessage;
use crate::config::KafkaConfig;

pub async fn create_kafka_producer(config: &KafkaConfig) -> Result<FutureProducer, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    debug!("rdkafka configuration: {:?}", client_config);
    let api: FutureProducer = client_config.create()?;

    // "Ping" the Kafka brokers by requesting metadata
    match api.client().fetch_metadata(None, Duration::from_secs(15)) {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(api)
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("failed to produce to kafka: {error}")]
    KafkaProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    KafkaProduceCanceled,
}

/// Where the broker placed a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

fn to_kafka_headers(message: &BurstMessage) -> OwnedHeaders {
    message
        .headers
        .iter()
        .fold(OwnedHeaders::new(), |headers, (key, value)| {
            headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_slice()),
            })
        })
}

/// Send the messages one after the other, waiting for each delivery report so
/// the burst lands in order. Stops at the first failed delivery.
pub async fn send_burst(
    kafka_producer: &FutureProducer,
    topic: &str,
    burst: &[BurstMessage],
) -> Result<Vec<Delivery>, KafkaProduceError> {
    let mut deliveries = Vec::with_capacity(burst.len());

    for message in burst {
        let record = FutureRecord {
            topic,
            key: Some(message.key.as_str()),
            payload: Some(message.value.as_str()),
            timestamp: None,
            partition: None,
            headers: Some(to_kafka_headers(message)),
        };

        let future_handle = kafka_producer
            .send_result(record)
            .map_err(|(e, _)| KafkaProduceError::KafkaProduceError { error: e })?;

        match future_handle.await {
            Ok(Ok((partition, offset))) => {
                info!(
                    "Message delivered to Partition: {} and Offset: {}",
                    partition, offset
                );
                deliveries.push(Delivery { partition, offset });
            }
            Ok(Err((e, _))) => return Err(KafkaProduceError::KafkaProduceError { error: e }),
            Err(_) => return Err(KafkaProduceError::KafkaProduceCanceled),
        }
    }

    Ok(deliveries)
}
