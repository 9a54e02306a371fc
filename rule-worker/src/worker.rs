use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use common_kafka::{Message, SourceConnector, StreamSource};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ProcessingError, WorkerError};
use crate::metrics_consts::{
    MESSAGES_TOTAL, PROCESSING_FAILURES_TOTAL, TRANSIENT_ERRORS_TOTAL, WORKER_TRANSITIONS_TOTAL,
};
use crate::registry::WorkerDefinition;
use crate::retry::RetryPolicy;

/// Lifecycle of a `ConsumerWorker`.
///
/// `Idle → Connecting → Subscribed → Running → Stopping → Stopped`, with
/// `Failed` reachable from `Connecting` and `Subscribed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Connecting,
    Subscribed,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Connecting => "connecting",
            WorkerState::Subscribed => "subscribed",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
            WorkerState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Failed)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared view of a worker's state. The worker writes it, the supervisor and
/// health endpoints read it, and the supervisor overrides it when it has to
/// abort a worker.
///
/// `Stopped` and `Failed` are final: once reached, only `force_fail` can still
/// change the state, so a worker that outlives its abort cannot undo it.
#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<watch::Sender<WorkerState>>,
}

impl StateHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(WorkerState::Idle);
        Self {
            inner: Arc::new(tx),
        }
    }

    pub fn get(&self) -> WorkerState {
        *self.inner.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.inner.subscribe()
    }

    /// Wait until the state satisfies `predicate`, returning the matching state.
    pub async fn wait_for(&self, predicate: impl Fn(WorkerState) -> bool) -> WorkerState {
        let mut rx = self.subscribe();
        let result = rx.wait_for(|state| predicate(*state)).await.map(|s| *s);
        // The sender lives as long as this handle, so the channel cannot close here.
        result.unwrap_or_else(|_| self.get())
    }

    /// Move to `state` unless a final state was already reached. Returns the
    /// previous state.
    pub(crate) fn set(&self, state: WorkerState) -> WorkerState {
        let mut previous = state;
        self.inner.send_if_modified(|current| {
            previous = *current;
            if current.is_terminal() || *current == state {
                return false;
            }
            *current = state;
            true
        });
        previous
    }

    /// Mark the worker `Failed` regardless of where it is.
    pub(crate) fn force_fail(&self) -> WorkerState {
        self.inner.send_replace(WorkerState::Failed)
    }
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct WorkerOptions {
    /// Upper bound for a single poll. Cancellation does not wait for it.
    pub poll_timeout: Duration,
    /// Backoff between polls failing with a transient error.
    pub retry_policy: RetryPolicy,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Binds one stream source to one rule engine and runs the consume-dispatch
/// loop until cancelled.
pub struct ConsumerWorker {
    definition: WorkerDefinition,
    connector: Arc<dyn SourceConnector>,
    options: WorkerOptions,
    state: StateHandle,
    shutdown: CancellationToken,
}

impl ConsumerWorker {
    pub fn new(
        definition: WorkerDefinition,
        connector: Arc<dyn SourceConnector>,
        options: WorkerOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            definition,
            connector,
            options,
            state: StateHandle::new(),
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn state(&self) -> StateHandle {
        self.state.clone()
    }

    fn transition(&self, next: WorkerState) {
        let previous = self.state.set(next);
        if previous.is_terminal() {
            debug!(
                worker = %self.definition.name,
                state = %previous,
                ignored = %next,
                "worker already finished, state left unchanged"
            );
            return;
        }
        debug!(
            worker = %self.definition.name,
            from = %previous,
            to = %next,
            "worker state changed"
        );
        metrics::counter!(
            WORKER_TRANSITIONS_TOTAL,
            "worker" => self.definition.name.clone(),
            "state" => next.as_str()
        )
        .increment(1);
    }

    fn fail(&self, source: common_kafka::ConnectionError) -> WorkerError {
        self.transition(WorkerState::Failed);
        WorkerError::Connection {
            worker: self.definition.name.clone(),
            stream: self.definition.stream.clone(),
            source,
        }
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// Returns `Ok` once the worker reached `Stopped`, or a `WorkerError` after
    /// it reached `Failed`.
    pub async fn run(self) -> Result<(), WorkerError> {
        let name = self.definition.name.clone();
        let stream = self.definition.stream.clone();

        self.transition(WorkerState::Connecting);
        let connected = tokio::select! {
            biased;

            _ = self.shutdown.cancelled() => {
                info!(worker = %name, "shutdown requested while connecting");
                self.transition(WorkerState::Stopped);
                return Ok(());
            }
            connected = self.connector.connect(&self.definition.config) => connected,
        };
        let mut source = connected.map_err(|e| self.fail(e))?;

        if let Err(e) = source.subscribe(&stream) {
            source.close();
            return Err(self.fail(e));
        }
        self.transition(WorkerState::Subscribed);
        info!(
            worker = %name,
            stream = %stream,
            group = %self.definition.config.group_id,
            "subscribed to stream"
        );

        self.transition(WorkerState::Running);
        self.consume(source.as_mut()).await;

        self.transition(WorkerState::Stopping);
        source.close();
        self.transition(WorkerState::Stopped);
        info!(worker = %name, "worker stopped");
        Ok(())
    }

    async fn consume(&self, source: &mut dyn StreamSource) {
        let name = &self.definition.name;
        let mut attempt: u32 = 0;

        loop {
            let polled = tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,
                polled = source.poll(self.options.poll_timeout) => polled,
            };

            match polled {
                Ok(Some(message)) => {
                    attempt = 0;
                    self.dispatch(&message);
                }
                Ok(None) => {
                    attempt = 0;
                }
                Err(e) => {
                    let delay = self.options.retry_policy.time_until_next_retry(attempt);
                    attempt = attempt.saturating_add(1);
                    metrics::counter!(TRANSIENT_ERRORS_TOTAL, "worker" => name.clone())
                        .increment(1);
                    warn!(
                        worker = %name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient error while polling, retrying: {}",
                        e
                    );

                    tokio::select! {
                        biased;

                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(worker = %name, "shutdown requested, leaving consume loop");
    }

    fn dispatch(&self, message: &Message) {
        let name = &self.definition.name;
        let engine = self.definition.engine.name();
        debug!(
            worker = %name,
            partition = message.partition,
            offset = message.offset,
            "{} received: {}",
            name,
            String::from_utf8_lossy(&message.value)
        );

        let labels = [("worker", name.clone()), ("engine", engine.to_owned())];
        metrics::counter!(MESSAGES_TOTAL, &labels).increment(1);

        let rules = &self.definition.engine;
        let result = catch_unwind(AssertUnwindSafe(|| rules.execute(message)))
            .unwrap_or_else(|payload| {
                Err(ProcessingError::Panicked {
                    engine,
                    reason: panic_message(payload.as_ref()),
                })
            });

        if let Err(e) = result {
            // The message still counts as handled, its offset has already been stored.
            metrics::counter!(PROCESSING_FAILURES_TOTAL, &labels).increment(1);
            error!(
                worker = %name,
                engine,
                partition = message.partition,
                offset = message.offset,
                "failed to process message: {}",
                e
            );
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_states_are_sticky() {
        let state = StateHandle::new();
        state.set(WorkerState::Running);

        assert_eq!(state.force_fail(), WorkerState::Running);
        assert_eq!(state.set(WorkerState::Stopping), WorkerState::Failed);
        state.set(WorkerState::Stopped);
        assert_eq!(state.get(), WorkerState::Failed);

        let stopped = StateHandle::new();
        stopped.set(WorkerState::Stopped);
        stopped.set(WorkerState::Running);
        assert_eq!(stopped.get(), WorkerState::Stopped);
        stopped.force_fail();
        assert_eq!(stopped.get(), WorkerState::Failed);
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload = catch_unwind(|| panic!("bad rule {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "bad rule 7");

        let payload = catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
