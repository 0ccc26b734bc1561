//! Error types for the stress engine.

use dbtester_core::BackendKind;
use thiserror::Error;

/// Failure of a single client call.
///
/// These never abort a run: the worker records the message text and moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The server or transport rejected the request.
    #[error("{0}")]
    Request(String),

    /// The key does not exist.
    #[error("key {0:?} not found")]
    NotFound(String),

    /// Create of a node that already exists.
    #[error("node {0:?} already exists")]
    NodeExists(String),

    /// The connection was closed by its teardown.
    #[error("connection closed")]
    Closed,

    /// A write reached a handler built for reads.
    #[error("write to {0:?} sent to a read handler")]
    WriteOnReader(String),

    /// An operation for one protocol reached a handler for another.
    #[error("{got} operation sent to {expected} handler")]
    BackendMismatch {
        expected: BackendKind,
        got: BackendKind,
    },
}

/// Errors that stop a stress phase.
#[derive(Error, Debug)]
pub enum StressError {
    /// The seed write before a read phase never succeeded.
    #[error("setup write failed after {attempts} attempts: {last_error}")]
    SetupWriteFailed { attempts: u32, last_error: String },

    /// Signalling the agents failed; the phase cannot continue.
    #[error("broadcast to agents failed: {0}")]
    Broadcast(String),

    /// Opening connections for a handler set failed.
    #[error("failed to connect to {endpoints:?}: {source}")]
    Connect {
        endpoints: Vec<String>,
        #[source]
        source: ClientError,
    },

    /// A session needs at least one handler to drain its channel.
    #[error("session has no request handlers")]
    EmptyHandlerSet,

    /// The aggregator was already drained or its task died.
    #[error("statistics aggregator is no longer running")]
    AggregatorClosed,

    /// The elastic scaling parameters cannot produce a run.
    #[error("invalid scaling plan: {0}")]
    InvalidPlan(String),

    /// A worker or generator task panicked.
    #[error("session task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for StressError {
    fn from(err: tokio::task::JoinError) -> Self {
        StressError::Task(err.to_string())
    }
}
