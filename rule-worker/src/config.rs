use std::str::FromStr;
use std::time;

use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;

use crate::retry::RetryPolicy;
use crate::rules::RuleEngineKind;
use crate::worker::WorkerOptions;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    #[envconfig(default = "trade")]
    pub trade_topic: NonEmptyString,

    #[envconfig(default = "trade-consumer-group")]
    pub trade_consumer_group: NonEmptyString,

    #[envconfig(default = "trade")]
    pub trade_engine: RuleEngineKind,

    #[envconfig(default = "Bid")]
    pub bid_topic: NonEmptyString,

    #[envconfig(default = "bid-consumer-group")]
    pub bid_consumer_group: NonEmptyString,

    #[envconfig(default = "bid")]
    pub bid_engine: RuleEngineKind,

    #[envconfig(default = "1000")]
    pub poll_timeout: EnvMsDuration,

    #[envconfig(default = "10000")]
    pub shutdown_grace_period: EnvMsDuration,

    #[envconfig(default = "false")]
    pub shutdown_on_stdin: bool,

    #[envconfig(nested = true)]
    pub retry_policy: RetryPolicyConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            poll_timeout: self.poll_timeout.0,
            retry_policy: RetryPolicy::new(
                self.retry_policy.backoff_coefficient,
                self.retry_policy.initial_interval.0,
                self.retry_policy.maximum_interval.0,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Envconfig, Clone)]
pub struct RetryPolicyConfig {
    #[envconfig(default = "2")]
    pub backoff_coefficient: u32,

    #[envconfig(default = "100")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(default = "5000")]
    pub maximum_interval: EnvMsDuration,
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
