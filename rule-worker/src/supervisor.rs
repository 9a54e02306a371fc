//! Starts one worker per registered definition, keeps them isolated from each
//! other, and stops them all with a bounded grace period.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use common_kafka::SourceConnector;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{SupervisorError, WorkerError};
use crate::metrics_consts::WORKERS_FORCE_RELEASED_TOTAL;
use crate::registry::WorkerRegistry;
use crate::worker::{panic_message, ConsumerWorker, StateHandle, WorkerOptions, WorkerState};

struct RunningWorker {
    name: String,
    state: StateHandle,
    handle: JoinHandle<Result<(), WorkerError>>,
}

/// How a worker ended during `stop_all`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Reached `Stopped` on its own.
    Stopped,
    /// Reached `Failed`, either while connecting or because the task panicked.
    Failed(String),
    /// Still running when the grace period ran out, and was aborted.
    ForceReleased,
}

#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub name: String,
    pub state: WorkerState,
    pub outcome: StopOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub workers: Vec<WorkerReport>,
}

impl ShutdownReport {
    pub fn failed(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers.iter().filter(|w| w.state == WorkerState::Failed)
    }

    pub fn is_clean(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Process exit code: 0 when every worker stopped cleanly, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            0
        } else {
            1
        }
    }
}

pub struct Supervisor {
    registry: Arc<WorkerRegistry>,
    connector: Arc<dyn SourceConnector>,
    options: WorkerOptions,
    shutdown: CancellationToken,
    workers: Vec<RunningWorker>,
    started: bool,
}

impl Supervisor {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        connector: Arc<dyn SourceConnector>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            registry,
            connector,
            options,
            shutdown: CancellationToken::new(),
            workers: Vec::new(),
            started: false,
        }
    }

    /// Token cancelled when shutdown begins. Cancelling it from outside is
    /// equivalent to the shutdown trigger firing.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Launch one worker task per registered definition and return without
    /// waiting for any of them to connect.
    pub fn start_all(&mut self) -> Result<usize, SupervisorError> {
        if self.started {
            return Err(SupervisorError::AlreadyStarted);
        }
        self.started = true;

        for definition in self.registry.definitions() {
            let worker = ConsumerWorker::new(
                definition.clone(),
                self.connector.clone(),
                self.options,
                self.shutdown.child_token(),
            );
            let name = worker.name().to_owned();
            let state = worker.state();

            let task_name = name.clone();
            let task_state = state.clone();
            let handle = tokio::spawn(async move {
                let result = match AssertUnwindSafe(worker.run()).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => {
                        task_state.force_fail();
                        Err(WorkerError::Panicked {
                            worker: task_name.clone(),
                            reason: panic_message(payload.as_ref()),
                        })
                    }
                };
                if let Err(e) = &result {
                    // Siblings keep running, the failure is only reported.
                    error!(worker = %task_name, "worker failed: {}", e);
                }
                result
            });

            self.workers.push(RunningWorker {
                name,
                state,
                handle,
            });
        }

        info!(workers = self.workers.len(), "started all workers");
        Ok(self.workers.len())
    }

    /// Current state of every launched worker, in registration order.
    pub fn states(&self) -> Vec<(String, WorkerState)> {
        self.workers
            .iter()
            .map(|w| (w.name.clone(), w.state.get()))
            .collect()
    }

    /// State handles of every launched worker, for health reporting.
    pub fn state_handles(&self) -> Vec<(String, StateHandle)> {
        self.workers
            .iter()
            .map(|w| (w.name.clone(), w.state.clone()))
            .collect()
    }

    pub fn worker_state(&self, name: &str) -> Result<WorkerState, SupervisorError> {
        self.registry.get(name)?;
        Ok(self
            .workers
            .iter()
            .find(|w| w.name == name)
            .map(|w| w.state.get())
            .unwrap_or(WorkerState::Idle))
    }

    /// Resolve when `trigger` completes or the shutdown token gets cancelled.
    pub async fn await_shutdown_signal<F>(&self, trigger: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = trigger => info!("shutdown trigger received"),
            _ = self.shutdown.cancelled() => info!("shutdown token cancelled"),
        }
    }

    /// Cancel every worker and wait for all of them to finish, sharing one
    /// `grace` deadline. Workers still running at the deadline are aborted and
    /// reported as failed.
    pub async fn stop_all(&mut self, grace: Duration) -> ShutdownReport {
        info!(
            workers = self.workers.len(),
            grace_secs = grace.as_secs_f64(),
            "stopping all workers"
        );
        self.shutdown.cancel();

        let deadline = Instant::now() + grace;
        let mut report = ShutdownReport::default();

        for RunningWorker {
            name,
            state,
            mut handle,
        } in self.workers.drain(..)
        {
            let outcome = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(()))) => StopOutcome::Stopped,
                Ok(Ok(Err(e))) => StopOutcome::Failed(e.to_string()),
                Ok(Err(join_error)) => {
                    error!(worker = %name, "worker task ended abnormally: {}", join_error);
                    state.force_fail();
                    StopOutcome::Failed(join_error.to_string())
                }
                Err(_elapsed) => {
                    handle.abort();
                    state.force_fail();
                    metrics::counter!(WORKERS_FORCE_RELEASED_TOTAL, "worker" => name.clone())
                        .increment(1);
                    warn!(
                        worker = %name,
                        grace_secs = grace.as_secs_f64(),
                        "worker did not stop within the grace period, force-released"
                    );
                    StopOutcome::ForceReleased
                }
            };

            let final_state = state.get();
            info!(worker = %name, state = %final_state, "worker finished");
            report.workers.push(WorkerReport {
                name,
                state: final_state,
                outcome,
            });
        }

        if report.is_clean() {
            info!("all workers stopped cleanly");
        } else {
            let failed: Vec<&str> = report.failed().map(|w| w.name.as_str()).collect();
            warn!(failed = ?failed, "shutdown complete with failed workers");
        }
        report
    }
}
