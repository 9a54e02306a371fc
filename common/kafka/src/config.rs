use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    // Time before we stop retrying producing a message: 20 seconds
    pub kafka_message_timeout_ms: u32,

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

impl KafkaConfig {
    /// Split the comma-separated `KAFKA_HOSTS` value into an endpoint list.
    pub fn endpoints(&self) -> Vec<String> {
        self.kafka_hosts
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

#[derive(Envconfig, Clone)]
pub struct ConsumerConfig {
    // We default to "earliest" for this, a new service probably wants "latest"
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: OffsetReset,

    // interval (in milliseconds) between Kafka offset commit attempts
    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: u32,

    // upper bound for the broker reachability probe done at connect time
    #[envconfig(default = "10000")]
    pub kafka_connect_timeout_ms: u64,
}

impl ConsumerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_connect_timeout_ms)
    }
}

/// Where a consumer group starts reading when it has no committed offset yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetReset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            _ => Err(format!(
                "Unknown offset reset policy: {s}, must be earliest or latest"
            )),
        }
    }
}

/// Everything a source needs to open a session with the broker for one worker.
///
/// Two workers sharing `group_id` on the same stream share offset progress and
/// split the messages between them; distinct groups each see every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub endpoints: Vec<String>,
    pub group_id: String,
    pub offset_reset: OffsetReset,
    pub auto_commit_interval_ms: u32,
}

impl ConnectionConfig {
    pub fn new(endpoints: Vec<String>, group_id: impl Into<String>) -> Self {
        Self {
            endpoints,
            group_id: group_id.into(),
            offset_reset: OffsetReset::default(),
            auto_commit_interval_ms: 5000,
        }
    }

    pub fn with_offset_reset(mut self, offset_reset: OffsetReset) -> Self {
        self.offset_reset = offset_reset;
        self
    }

    pub fn with_auto_commit_interval_ms(mut self, interval_ms: u32) -> Self {
        self.auto_commit_interval_ms = interval_ms;
        self
    }

    /// Build a per-worker connection config from the shared env config.
    pub fn from_env_config(
        kafka: &KafkaConfig,
        consumer: &ConsumerConfig,
        group_id: impl Into<String>,
    ) -> Self {
        Self::new(kafka.endpoints(), group_id)
            .with_offset_reset(consumer.kafka_consumer_offset_reset)
            .with_auto_commit_interval_ms(consumer.kafka_consumer_auto_commit_interval_ms)
    }

    /// Comma-joined endpoint list, the format librdkafka expects for `bootstrap.servers`.
    pub fn bootstrap_servers(&self) -> String {
        self.endpoints.join(",")
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.endpoints.is_empty() {
            return Err("no broker endpoints configured".to_owned());
        }
        if self.endpoints.iter().any(|e| e.trim().is_empty()) {
            return Err("broker endpoint must not be empty".to_owned());
        }
        if self.group_id.trim().is_empty() {
            return Err("consumer group id must not be empty".to_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_reset_parses_case_insensitively() {
        assert_eq!("earliest".parse::<OffsetReset>(), Ok(OffsetReset::Earliest));
        assert_eq!(" LATEST ".parse::<OffsetReset>(), Ok(OffsetReset::Latest));
        assert!("beginning".parse::<OffsetReset>().is_err());
    }

    #[test]
    fn endpoints_split_on_commas() {
        let config = KafkaConfig {
            kafka_producer_linger_ms: 0,
            kafka_producer_queue_mib: 50,
            kafka_message_timeout_ms: 5000,
            kafka_compression_codec: "none".to_string(),
            kafka_hosts: "kafka-1:9092, kafka-2:9092,,".to_string(),
        };

        assert_eq!(config.endpoints(), vec!["kafka-1:9092", "kafka-2:9092"]);
    }

    #[test]
    fn validate_rejects_missing_fields() {
        let valid = ConnectionConfig::new(vec!["localhost:9092".to_owned()], "group");
        assert!(valid.validate().is_ok());

        let no_endpoints = ConnectionConfig::new(vec![], "group");
        assert!(no_endpoints.validate().is_err());

        let blank_endpoint = ConnectionConfig::new(vec![" ".to_owned()], "group");
        assert!(blank_endpoint.validate().is_err());

        let no_group = ConnectionConfig::new(vec!["localhost:9092".to_owned()], "");
        assert!(no_group.validate().is_err());
    }
}
