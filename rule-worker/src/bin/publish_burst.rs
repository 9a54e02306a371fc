//! Publish the fixed burst of labeled test messages to one topic.
use common_kafka::burst::{build_burst, KeyMode};
use common_kafka::config::KafkaConfig;
use common_kafka::kafka_producer::{create_kafka_producer, send_burst};
use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rule_worker::config::NonEmptyString;

#[derive(Envconfig)]
struct Config {
    #[envconfig(nested = true)]
    kafka: KafkaConfig,

    burst_topic: NonEmptyString,

    // "true"/"unique" for a fresh key per message, "false"/"shared" for one key
    #[envconfig(from = "BURST_UNIQUE_KEYS", default = "false")]
    key_mode: KeyMode,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::init_from_env().wrap_err("Invalid configuration")?;
    let key_mode = config.key_mode;

    let producer = create_kafka_producer(&config.kafka)
        .await
        .wrap_err("failed to create kafka producer")?;
    let deliveries = send_burst(&producer, config.burst_topic.as_str(), &build_burst(key_mode))
        .await
        .wrap_err("delivery failed")?;

    info!(
        topic = config.burst_topic.as_str(),
        key_mode = ?key_mode,
        "Published {} messages",
        deliveries.len()
    );
    Ok(())
}
