use std::sync::atomic::{AtomicU64, Ordering};

use common_kafka::Message;
use tracing::info;

use super::{decode, RuleEngine};
use crate::error::ProcessingError;

#[derive(Default)]
pub struct BidRuleEngine {
    applied: AtomicU64,
}

impl BidRuleEngine {
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }
}

impl RuleEngine for BidRuleEngine {
    fn name(&self) -> &'static str {
        "bid"
    }

    fn execute(&self, message: &Message) -> Result<(), ProcessingError> {
        let bid = decode(message)?.trim();
        if bid.is_empty() {
            return Err(ProcessingError::Rejected {
                engine: self.name(),
                reason: format!("empty bid at {}:{}", message.partition, message.offset),
            });
        }

        let headers: Vec<&str> = message.headers.keys().map(String::as_str).collect();
        info!(
            partition = message.partition,
            offset = message.offset,
            headers = ?headers,
            "BidRuleEngine applied rules on message: {}",
            bid
        );
        self.applied.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_message;

    #[test]
    fn rejects_empty_bids() {
        let engine = BidRuleEngine::default();

        let result = engine.execute(&test_message("Bid", 3, b"   "));

        assert!(matches!(
            result,
            Err(ProcessingError::Rejected { engine: "bid", .. })
        ));
        assert_eq!(engine.applied(), 0);
    }

    #[test]
    fn applies_rules_to_bids() {
        let engine = BidRuleEngine::default();

        engine.execute(&test_message("Bid", 0, b"4 Message")).unwrap();

        assert_eq!(engine.applied(), 1);
    }
}
