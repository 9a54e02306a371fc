pub const MESSAGES_TOTAL: &str = "rule_worker_messages_total";
pub const PROCESSING_FAILURES_TOTAL: &str = "rule_worker_processing_failures_total";
pub const TRANSIENT_ERRORS_TOTAL: &str = "rule_worker_transient_errors_total";
pub const WORKER_TRANSITIONS_TOTAL: &str = "rule_worker_state_transitions_total";
pub const WORKERS_FORCE_RELEASED_TOTAL: &str = "rule_worker_force_released_total";
