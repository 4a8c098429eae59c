//! External collaborator traits (spec.md §6). The core only depends on
//! these contracts; concrete adapters (catalog, Pulsar, leader-election,
//! submit validator) are out of scope per spec.md §1 — see `crate::testkit`
//! for in-memory fakes used by tests and local runs.

use crate::error::CycleError;
use crate::jobdb::job::{Job, JobRun};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A row-level error attached to a run by the catalog (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunError {
    pub message: String,
}

/// Rows returned by [`JobRepository::fetch_updates`]: either a brand new job
/// or a delta to merge into an existing one (spec.md §4.6 step 1).
#[derive(Debug, Clone)]
pub enum JobRow {
    New(Job),
    Delta(JobDelta),
}

/// The subset of a [`Job`] a catalog delta row can change. Cycle code merges
/// this into the in-memory job rather than replacing it wholesale, advancing
/// `queued_version` only when the row's is strictly greater
/// (spec.md §4.6 step 1).
#[derive(Debug, Clone)]
pub struct JobDelta {
    pub job_id: String,
    pub queued: Option<bool>,
    pub queued_version: u32,
    pub cancel_requested: Option<bool>,
    pub cancel_by_job_set_requested: Option<bool>,
    pub validated: Option<bool>,
}

#[derive(Debug, Clone)]
pub enum RunRow {
    New(JobRun),
    Delta(RunDelta),
}

#[derive(Debug, Clone, Default)]
pub struct RunDelta {
    pub run_id: String,
    pub job_id: String,
    pub running: Option<bool>,
    pub succeeded: Option<bool>,
    pub failed: Option<bool>,
    pub returned: Option<bool>,
    pub cancelled: Option<bool>,
    pub attempted: Option<bool>,
    pub preempt_requested: Option<bool>,
    pub pending: Option<bool>,
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn fetch_updates(&self, job_serial: i64, run_serial: i64) -> Result<(Vec<JobRow>, Vec<RunRow>, i64, i64), CycleError>;
    async fn fetch_job_run_errors(&self, run_ids: &[String]) -> Result<BTreeMap<String, RunError>, CycleError>;
    async fn fetch_initial_jobs(&self) -> Result<(Vec<Job>, Vec<JobRun>, i64, i64), CycleError>;
    async fn count_received_partitions(&self, group_id: &str) -> Result<u32, CycleError>;
}

#[async_trait]
pub trait ExecutorRepository: Send + Sync {
    async fn get_last_update_times(&self) -> Result<BTreeMap<String, i64>, CycleError>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// `should_publish` is evaluated *at publish time*, not when the call
    /// is made (spec.md §6).
    async fn publish(
        &self,
        events: Vec<super::events::QueuedEventSequence>,
        should_publish: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<(), CycleError>;
}

pub trait LeaderController: Send + Sync {
    fn get_token(&self) -> LeaderToken;
    fn is_leader(&self, token: &LeaderToken) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderToken(pub u64);

#[derive(Debug, Clone)]
pub struct SubmitCheckResult {
    pub schedulable: bool,
    pub reason: Option<String>,
}

#[async_trait]
pub trait SubmitChecker: Send + Sync {
    async fn check(&self, jobs: &[Job]) -> Result<BTreeMap<String, SubmitCheckResult>, CycleError>;
}

/// `(queue, priceBand, pool) -> bid`, carrying a snapshot timestamp so a
/// stale feed can be detected (SPEC_FULL.md §2, grounded on
/// `pricing/types.go`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidPrice {
    pub queued_bid: f64,
    pub running_bid: f64,
}

#[derive(Debug, Clone)]
pub struct BidPriceSnapshot {
    pub prices: BTreeMap<(String, String, String), BidPrice>,
    pub observed_at: i64,
}

#[async_trait]
pub trait BidPriceProvider: Send + Sync {
    async fn get_bid_prices(&self) -> Result<BidPriceSnapshot, CycleError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}
