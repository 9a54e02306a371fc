#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use common_kafka::memory::{MemoryBroker, DEFAULT_MEMORY_ADDRESS};
use common_kafka::{ConnectionConfig, Message};
use rule_worker::error::ProcessingError;
use rule_worker::retry::RetryPolicy;
use rule_worker::rules::RuleEngine;
use rule_worker::worker::WorkerOptions;

/// Records every message it sees. Optionally fails or panics on one of them,
/// or blocks the calling thread to simulate a slow rule.
#[derive(Default)]
pub struct RecordingEngine {
    seen: Mutex<Vec<Message>>,
    fail_on: Option<String>,
    panic_on: Option<String>,
    block_for: Option<Duration>,
    started: AtomicBool,
}

impl RecordingEngine {
    pub fn failing_on(value: &str) -> Self {
        Self {
            fail_on: Some(value.to_owned()),
            ..Default::default()
        }
    }

    pub fn panicking_on(value: &str) -> Self {
        Self {
            panic_on: Some(value.to_owned()),
            ..Default::default()
        }
    }

    pub fn blocking_for(duration: Duration) -> Self {
        Self {
            block_for: Some(duration),
            ..Default::default()
        }
    }

    pub fn seen(&self) -> Vec<Message> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl RuleEngine for RecordingEngine {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn execute(&self, message: &Message) -> Result<(), ProcessingError> {
        self.started.store(true, Ordering::SeqCst);
        if let Some(duration) = self.block_for {
            std::thread::sleep(duration);
        }
        self.seen.lock().unwrap().push(message.clone());
        if let Some(value) = &self.panic_on {
            if message.value == value.as_bytes() {
                panic!("rule blew up on {value}");
            }
        }

        match &self.fail_on {
            Some(value) if message.value == value.as_bytes() => Err(ProcessingError::Rejected {
                engine: "recording",
                reason: "injected failure".to_owned(),
            }),
            _ => Ok(()),
        }
    }
}

pub fn memory_config(group: &str) -> ConnectionConfig {
    ConnectionConfig::new(vec![DEFAULT_MEMORY_ADDRESS.to_owned()], group)
}

pub fn fast_options() -> WorkerOptions {
    WorkerOptions {
        poll_timeout: Duration::from_millis(50),
        retry_policy: RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(50)),
    }
}

pub fn publish_values(broker: &MemoryBroker, stream: &str, values: &[&str]) {
    for value in values {
        broker.publish(stream, None, value.as_bytes(), Default::default());
    }
}

/// Poll `condition` until it holds, giving up after five seconds.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}
