use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::worker::{StateHandle, WorkerState};

/// Health of the process, derived from the state of every worker.
///
/// Liveness and readiness answer different questions, so they are computed
/// separately:
///   - live: no worker has ended in `Failed`
///   - ready: every worker is `Running`
#[derive(Default, Debug)]
pub struct HealthStatus {
    /// The overall status of the probe
    pub healthy: bool,
    /// Current state of each worker, for display
    pub components: BTreeMap<String, WorkerState>,
}

impl IntoResponse for HealthStatus {
    /// Computes the axum status code based on the overall health status,
    /// and prints each worker state in the body for debugging.
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Clone, Default)]
pub struct WorkerHealth {
    workers: Arc<Vec<(String, StateHandle)>>,
}

impl WorkerHealth {
    pub fn new(workers: Vec<(String, StateHandle)>) -> Self {
        Self {
            workers: Arc::new(workers),
        }
    }

    fn snapshot(&self) -> BTreeMap<String, WorkerState> {
        self.workers
            .iter()
            .map(|(name, state)| (name.clone(), state.get()))
            .collect()
    }

    pub fn liveness(&self) -> HealthStatus {
        let components = self.snapshot();
        HealthStatus {
            healthy: !components.values().any(|s| *s == WorkerState::Failed),
            components,
        }
    }

    pub fn readiness(&self) -> HealthStatus {
        let components = self.snapshot();
        HealthStatus {
            healthy: !components.is_empty()
                && components.values().all(|s| *s == WorkerState::Running),
            components,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_worker_breaks_liveness_only_for_itself() {
        let running = StateHandle::new();
        running.set(WorkerState::Running);
        let failed = StateHandle::new();
        failed.set(WorkerState::Failed);

        let health = WorkerHealth::new(vec![
            ("A".to_owned(), running.clone()),
            ("B".to_owned(), failed),
        ]);

        let liveness = health.liveness();
        assert!(!liveness.healthy);
        assert_eq!(liveness.components.get("A"), Some(&WorkerState::Running));
        assert!(!health.readiness().healthy);

        let health = WorkerHealth::new(vec![("A".to_owned(), running)]);
        assert!(health.liveness().healthy);
        assert!(health.readiness().healthy);
    }

    #[test]
    fn no_workers_is_live_but_not_ready() {
        let health = WorkerHealth::default();

        assert!(health.liveness().healthy);
        assert!(!health.readiness().healthy);
    }

    #[test]
    fn starting_worker_is_not_ready() {
        let state = StateHandle::new();
        state.set(WorkerState::Connecting);
        let health = WorkerHealth::new(vec![("A".to_owned(), state)]);

        assert!(health.liveness().healthy);
        assert!(!health.readiness().healthy);
    }
}
