use std::sync::atomic::{AtomicU64, Ordering};

use common_kafka::Message;
use tracing::info;

use super::{decode, RuleEngine};
use crate::error::ProcessingError;

#[derive(Default)]
pub struct TradeRuleEngine {
    applied: AtomicU64,
}

impl TradeRuleEngine {
    /// Number of messages the rules were applied to, redeliveries included.
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }
}

impl RuleEngine for TradeRuleEngine {
    fn name(&self) -> &'static str {
        "trade"
    }

    fn execute(&self, message: &Message) -> Result<(), ProcessingError> {
        let trade = decode(message)?;

        info!(
            partition = message.partition,
            offset = message.offset,
            key = message.key_str().unwrap_or_default(),
            "TradeRuleEngine applied rules on message: {}",
            trade
        );
        self.applied.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }
}
