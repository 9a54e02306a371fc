use common_kafka::ConnectionError;
use thiserror::Error;

/// A rule engine could not apply its rules to one message. The worker logs it
/// and moves on to the next message.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("message at {partition}:{offset} is not valid UTF-8")]
    Decode { partition: i32, offset: i64 },
    #[error("message rejected by {engine} rules: {reason}")]
    Rejected {
        engine: &'static str,
        reason: String,
    },
    #[error("{engine} rules panicked: {reason}")]
    Panicked {
        engine: &'static str,
        reason: String,
    },
}

/// Misuse of the worker registry, only raised while configuring startup.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a worker named {0} is already registered")]
    DuplicateName(String),
    #[error("no worker named {0} is registered")]
    NotFound(String),
}

/// Enumeration of errors that end a single worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("worker {worker} could not connect to stream {stream}: {source}")]
    Connection {
        worker: String,
        stream: String,
        #[source]
        source: ConnectionError,
    },
    #[error("worker {worker} panicked: {reason}")]
    Panicked { worker: String, reason: String },
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("workers have already been started")]
    AlreadyStarted,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
