use std::sync::Arc;
use std::time::Duration;

use common_kafka::memory::MemoryBroker;
use rule_worker::error::WorkerError;
use rule_worker::registry::WorkerRegistry;
use rule_worker::worker::{ConsumerWorker, WorkerState};
use tokio_util::sync::CancellationToken;

mod common;
use common::{eventually, fast_options, memory_config, publish_values, within, RecordingEngine};

fn worker(
    broker: &MemoryBroker,
    stream: &str,
    engine: Arc<RecordingEngine>,
    shutdown: CancellationToken,
) -> ConsumerWorker {
    let mut registry = WorkerRegistry::new();
    registry
        .register("TradeConsumer", stream, memory_config("trade-consumer-group"), engine)
        .unwrap();
    let definition = registry.get("TradeConsumer").unwrap().clone();
    ConsumerWorker::new(
        definition,
        Arc::new(broker.connector()),
        fast_options(),
        shutdown,
    )
}

#[tokio::test]
async fn walks_the_lifecycle_in_order() {
    let broker = MemoryBroker::new(1);
    let engine = Arc::new(RecordingEngine::default());
    let shutdown = CancellationToken::new();
    let worker = worker(&broker, "trade", engine.clone(), shutdown.clone());
    let state = worker.state();
    let mut transitions = state.subscribe();
    assert_eq!(state.get(), WorkerState::Idle);

    let seen = tokio::spawn(async move {
        let mut seen = vec![*transitions.borrow_and_update()];
        while transitions.changed().await.is_ok() {
            let next = *transitions.borrow_and_update();
            seen.push(next);
            if next.is_terminal() {
                break;
            }
        }
        seen
    });
    let handle = tokio::spawn(worker.run());

    within(state.wait_for(|s| s == WorkerState::Running)).await;
    publish_values(&broker, "trade", &["0 Message", "1 Message"]);
    assert!(eventually(|| engine.count() == 2).await);

    shutdown.cancel();
    within(handle).await.unwrap().unwrap();
    assert_eq!(state.get(), WorkerState::Stopped);

    // A watch receiver may skip intermediate values, but never reorders them.
    let seen = within(seen).await.unwrap();
    let order = [
        WorkerState::Idle,
        WorkerState::Connecting,
        WorkerState::Subscribed,
        WorkerState::Running,
        WorkerState::Stopping,
        WorkerState::Stopped,
    ];
    let positions: Vec<_> = seen
        .iter()
        .map(|s| order.iter().position(|o| o == s).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(seen.last(), Some(&WorkerState::Stopped));
}

#[tokio::test]
async fn unreachable_broker_fails_with_a_connection_error() {
    let broker = MemoryBroker::new(1);
    broker.set_reachable(false);
    let worker = worker(
        &broker,
        "trade",
        Arc::new(RecordingEngine::default()),
        CancellationToken::new(),
    );
    let state = worker.state();

    let result = within(worker.run()).await;

    match result {
        Err(WorkerError::Connection { worker, stream, .. }) => {
            assert_eq!(worker, "TradeConsumer");
            assert_eq!(stream, "trade");
        }
        other => panic!("expected a connection error, got {other:?}"),
    }
    assert_eq!(state.get(), WorkerState::Failed);
}

#[tokio::test]
async fn cancelled_before_start_stops_without_consuming() {
    let broker = MemoryBroker::new(1);
    publish_values(&broker, "trade", &["never read"]);
    let engine = Arc::new(RecordingEngine::default());
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let worker = worker(&broker, "trade", engine.clone(), shutdown);
    let state = worker.state();

    within(worker.run()).await.unwrap();

    assert_eq!(state.get(), WorkerState::Stopped);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.count(), 0);
}

#[tokio::test]
async fn panicking_rule_is_a_processing_failure() {
    let broker = MemoryBroker::new(1);
    let engine = Arc::new(RecordingEngine::panicking_on("1 Message"));
    let shutdown = CancellationToken::new();
    let worker = worker(&broker, "trade", engine.clone(), shutdown.clone());
    let state = worker.state();
    let handle = tokio::spawn(worker.run());

    within(state.wait_for(|s| s == WorkerState::Running)).await;
    publish_values(&broker, "trade", &["0 Message", "1 Message", "2 Message"]);

    assert!(eventually(|| engine.count() == 3).await);
    assert_eq!(engine.seen()[2].value, b"2 Message".to_vec());
    assert_eq!(state.get(), WorkerState::Running);

    shutdown.cancel();
    within(handle).await.unwrap().unwrap();
    assert_eq!(state.get(), WorkerState::Stopped);
}
