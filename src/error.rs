use thiserror::Error;

/// Errors raised by [`crate::resources::ResourceList`] construction and arithmetic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("resource `{0}` is not in the configured canonical ordering")]
    UnknownResource(String),
    #[error("resolution for `{name}` must be positive, got {resolution}")]
    NonPositiveResolution { name: String, resolution: i64 },
    #[error("resolution {child} for `{name}` does not evenly divide indexed resolution {parent}")]
    ResolutionMismatch {
        name: String,
        parent: i64,
        child: i64,
    },
}

/// Errors raised by [`crate::jobdb::JobDb`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobDbError {
    #[error("transaction is already closed")]
    TxnClosed,
    #[error("a write transaction is already open")]
    WriteTxnInProgress,
    #[error("unknown priority class `{0}`")]
    UnknownPriorityClass(String),
    #[error("queuedVersion for job `{job_id}` went backwards: {previous} -> {attempted}")]
    NonMonotoneQueuedVersion {
        job_id: String,
        previous: u32,
        attempted: u32,
    },
    #[error("job `{0}` not found")]
    JobNotFound(String),
    #[error("run `{0}` not found")]
    RunNotFound(String),
}

/// Errors raised by [`crate::nodedb::NodeDb`] bind/evict/unbind operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeDbError {
    #[error("transaction is already closed")]
    TxnClosed,
    #[error("node `{0}` not found")]
    NodeNotFound(String),
    #[error("job `{job_id}` is already bound to node `{node_id}`")]
    AlreadyBound { job_id: String, node_id: String },
    #[error("job `{job_id}` is not bound to node `{node_id}`")]
    NotBound { job_id: String, node_id: String },
    #[error("no node in the pool fits the job's requirements")]
    Unschedulable,
}

/// Errors from gang-level scheduling enforcement (spec.md §4.5).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GangSchedulingError {
    #[error("gang cardinality {cardinality} exceeds the maximum scheduling burst {max}")]
    ExceedsMaximumBurst { cardinality: usize, max: usize },
    #[error("scheduling this gang would exceed the resource fraction cap for `{resource}`")]
    ExceedsResourceFractionCap { resource: String },
    #[error("scheduling this gang would exceed the per-queue cap for `{queue}` at priority class `{priority_class}`")]
    ExceedsQueueCap {
        queue: String,
        priority_class: String,
    },
    #[error("scheduling key is marked globally unfeasible")]
    MemoizedUnfeasible,
    #[error(transparent)]
    NodeDb(#[from] NodeDbError),
}

/// Top-level cycle error: transient infrastructure failures only (spec.md §7).
/// Per-job scheduling failures never surface here; they become
/// [`crate::cycle::events::Event::JobErrors`] instead.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("fetching catalog updates failed: {0}")]
    CatalogFetch(String),
    #[error("fetching executor heartbeats failed: {0}")]
    ExecutorHeartbeatFetch(String),
    #[error("submit-check call failed: {0}")]
    SubmitCheck(String),
    #[error("bid price fetch failed: {0}")]
    BidPriceFetch(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error(transparent)]
    JobDb(#[from] JobDbError),
    #[error(transparent)]
    NodeDb(#[from] NodeDbError),
}

/// Terminal job errors emitted to the event stream (spec.md §7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobErrorReason {
    PodError(String),
    PodLeaseReturned,
    JobRunPreemptedError,
    MaxRunsExceeded,
    ExecutorStale,
    UnschedulableByChecker(String),
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field `{0}`")]
    MissingRequired(String),
    #[error("field `{field}` must be >= {min}, got {value}")]
    BelowMinimum {
        field: String,
        min: f64,
        value: f64,
    },
    #[error("could not load configuration: {0}")]
    Load(#[from] config::ConfigError),
}
