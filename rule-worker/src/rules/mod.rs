//! Rule engines applied to the messages of each stream.
//!
//! An engine must tolerate seeing the same message twice (delivery is
//! at-least-once) and must not rely on ordering across partitions or streams.

use std::str::FromStr;
use std::sync::Arc;

use common_kafka::Message;

use crate::error::ProcessingError;

mod bid;
mod trade;

pub use bid::BidRuleEngine;
pub use trade::TradeRuleEngine;

pub trait RuleEngine: Send + Sync {
    /// Short name used in logs and metrics labels.
    fn name(&self) -> &'static str;

    fn execute(&self, message: &Message) -> Result<(), ProcessingError>;
}

/// The engines this service knows how to build from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEngineKind {
    Trade,
    Bid,
}

impl RuleEngineKind {
    pub fn build(&self) -> Arc<dyn RuleEngine> {
        match self {
            RuleEngineKind::Trade => Arc::new(TradeRuleEngine::default()),
            RuleEngineKind::Bid => Arc::new(BidRuleEngine::default()),
        }
    }
}

impl FromStr for RuleEngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "trade" => Ok(RuleEngineKind::Trade),
            "bid" => Ok(RuleEngineKind::Bid),
            _ => Err(format!("Unknown rule engine: {s}, must be trade or bid")),
        }
    }
}

fn decode(message: &Message) -> Result<&str, ProcessingError> {
    message.value_str().map_err(|_| ProcessingError::Decode {
        partition: message.partition,
        offset: message.offset,
    })
}

#[cfg(test)]
pub(crate) fn test_message(stream: &str, offset: i64, value: &[u8]) -> Message {
    Message {
        stream: stream.to_owned(),
        key: Some(b"Key123".to_vec()),
        value: value.to_vec(),
        headers: common_kafka::burst::burst_headers(),
        partition: 0,
        offset,
    }
}
