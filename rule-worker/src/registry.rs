use std::sync::Arc;

use common_kafka::ConnectionConfig;
use tracing::{info, warn};

use crate::error::RegistryError;
use crate::rules::RuleEngine;

/// Everything needed to build one worker. Immutable once registered.
#[derive(Clone)]
pub struct WorkerDefinition {
    pub name: String,
    pub stream: String,
    pub config: ConnectionConfig,
    pub engine: Arc<dyn RuleEngine>,
}

impl std::fmt::Debug for WorkerDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDefinition")
            .field("name", &self.name)
            .field("stream", &self.stream)
            .field("config", &self.config)
            .field("engine", &self.engine.name())
            .finish()
    }
}

/// Named worker definitions, populated at startup and read-only once the
/// supervisor takes it.
#[derive(Default, Debug)]
pub struct WorkerRegistry {
    definitions: Vec<WorkerDefinition>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        stream: &str,
        config: ConnectionConfig,
        engine: Arc<dyn RuleEngine>,
    ) -> Result<(), RegistryError> {
        if self.definitions.iter().any(|d| d.name == name) {
            return Err(RegistryError::DuplicateName(name.to_owned()));
        }

        for other in self.definitions.iter().filter(|d| d.stream == stream) {
            if other.config.group_id == config.group_id {
                warn!(
                    worker = name,
                    other = %other.name,
                    stream,
                    group = %config.group_id,
                    "workers share a consumer group on the same stream and will split its messages"
                );
            } else {
                info!(
                    worker = name,
                    other = %other.name,
                    stream,
                    "distinct consumer groups on the same stream, each worker gets every message"
                );
            }
        }

        info!(
            worker = name,
            stream,
            group = %config.group_id,
            engine = engine.name(),
            "registered worker"
        );
        self.definitions.push(WorkerDefinition {
            name: name.to_owned(),
            stream: stream.to_owned(),
            config,
            engine,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&WorkerDefinition, RegistryError> {
        self.definitions
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> impl Iterator<Item = &WorkerDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use tracing_subscriber::fmt::MakeWriter;

    use super::*;
    use crate::rules::{BidRuleEngine, TradeRuleEngine};

    fn config(group: &str) -> ConnectionConfig {
        ConnectionConfig::new(vec!["localhost:9092".to_owned()], group)
    }

    /// Collects formatted log lines in memory.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = WorkerRegistry::new();
        registry
            .register(
                "TradeConsumer",
                "trade",
                config("trade-consumer-group"),
                Arc::new(TradeRuleEngine::default()),
            )
            .unwrap();
        registry
            .register(
                "BidConsumer",
                "Bid",
                config("bid-consumer-group"),
                Arc::new(BidRuleEngine::default()),
            )
            .unwrap();

        let trade = registry.get("TradeConsumer").unwrap();
        assert_eq!(trade.stream, "trade");
        assert_eq!(trade.engine.name(), "trade");
        assert_eq!(registry.len(), 2);

        let names: Vec<_> = registry.definitions().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["TradeConsumer", "BidConsumer"]);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = WorkerRegistry::new();
        registry
            .register("A", "orders", config("a"), Arc::new(TradeRuleEngine::default()))
            .unwrap();

        let bid = Arc::new(BidRuleEngine::default());
        let result = registry.register("A", "other", config("b"), bid);

        assert_eq!(result, Err(RegistryError::DuplicateName("A".to_owned())));
        assert_eq!(registry.get("A").unwrap().stream, "orders");
    }

    #[test]
    fn unknown_name_is_not_found() {
        let registry = WorkerRegistry::new();

        assert!(registry.is_empty());
        assert_eq!(
            registry.get("missing").unwrap_err(),
            RegistryError::NotFound("missing".to_owned())
        );
    }

    #[test]
    fn reports_broadcast_and_shared_groups() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut registry = WorkerRegistry::new();
            for (name, group) in [("A", "group-a"), ("B", "group-b")] {
                registry
                    .register(name, "orders", config(group), Arc::new(TradeRuleEngine::default()))
                    .unwrap();
            }
            let lines_before_shared = logs.contents().lines().count();
            assert!(!logs.contents().contains("split its messages"));

            registry
                .register("C", "orders", config("group-a"), Arc::new(BidRuleEngine::default()))
                .unwrap();

            let output = logs.contents();
            let shared: Vec<_> = output.lines().skip(lines_before_shared).collect();
            assert!(shared
                .iter()
                .any(|l| l.contains("WARN") && l.contains("split its messages")));
        });

        let output = logs.contents();
        assert!(output.contains("each worker gets every message"));
        assert!(output.contains("other=A"));
    }
}
