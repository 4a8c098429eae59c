//! In-memory fakes for every `cycle::interfaces` trait (spec.md §6), used by
//! integration tests and by `src/bin/scheduler.rs` when no external catalog
//! or leader-election backend is configured.

use crate::cycle::events::QueuedEventSequence;
use crate::cycle::interfaces::{
    BidPrice, BidPriceProvider, BidPriceSnapshot, Clock, ExecutorRepository, JobRepository, JobRow, LeaderController,
    LeaderToken, Publisher, RunError, RunRow, SubmitCheckResult, SubmitChecker,
};
use crate::error::CycleError;
use crate::jobdb::job::{Job, JobRun};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Queues up `(JobRow, RunRow)` batches fed to it by a test, handing back
/// one batch per `fetch_updates` call (spec.md §6).
#[derive(Default)]
pub struct FakeJobRepository {
    pending: Mutex<Vec<(Vec<JobRow>, Vec<RunRow>)>>,
    next_job_serial: AtomicI64,
    next_run_serial: AtomicI64,
}

impl FakeJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_update(&self, jobs: Vec<JobRow>, runs: Vec<RunRow>) {
        self.pending.lock().push((jobs, runs));
    }
}

#[async_trait]
impl JobRepository for FakeJobRepository {
    async fn fetch_updates(&self, _job_serial: i64, _run_serial: i64) -> Result<(Vec<JobRow>, Vec<RunRow>, i64, i64), CycleError> {
        let batch = self.pending.lock().pop();
        let (jobs, runs) = batch.unwrap_or_default();
        let job_serial = self.next_job_serial.fetch_add(jobs.len() as i64, Ordering::SeqCst) + jobs.len() as i64;
        let run_serial = self.next_run_serial.fetch_add(runs.len() as i64, Ordering::SeqCst) + runs.len() as i64;
        Ok((jobs, runs, job_serial, run_serial))
    }

    async fn fetch_job_run_errors(&self, _run_ids: &[String]) -> Result<BTreeMap<String, RunError>, CycleError> {
        Ok(BTreeMap::new())
    }

    async fn fetch_initial_jobs(&self) -> Result<(Vec<Job>, Vec<JobRun>, i64, i64), CycleError> {
        Ok((Vec::new(), Vec::new(), 0, 0))
    }

    async fn count_received_partitions(&self, _group_id: &str) -> Result<u32, CycleError> {
        Ok(1)
    }
}

/// Reports every executor as freshly seen unless pre-seeded with a stale
/// timestamp via [`FakeExecutorRepository::set_last_update`].
#[derive(Default)]
pub struct FakeExecutorRepository {
    last_update: Mutex<BTreeMap<String, i64>>,
}

impl FakeExecutorRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_last_update(&self, executor_id: &str, timestamp: i64) {
        self.last_update.lock().insert(executor_id.to_string(), timestamp);
    }
}

#[async_trait]
impl ExecutorRepository for FakeExecutorRepository {
    async fn get_last_update_times(&self) -> Result<BTreeMap<String, i64>, CycleError> {
        Ok(self.last_update.lock().clone())
    }
}

/// Collects every published sequence so tests can assert on emitted events.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<QueuedEventSequence>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<QueuedEventSequence> {
        std::mem::take(&mut self.published.lock())
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        events: Vec<QueuedEventSequence>,
        should_publish: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<(), CycleError> {
        if should_publish() {
            self.published.lock().extend(events);
        }
        Ok(())
    }
}

/// Always reports leadership; the standalone deployment mode never contends
/// for a lease (SPEC_FULL.md §1, `leader.mode = "standalone"`).
pub struct AlwaysLeader {
    counter: AtomicU64,
}

impl Default for AlwaysLeader {
    fn default() -> Self {
        Self { counter: AtomicU64::new(0) }
    }
}

impl AlwaysLeader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeaderController for AlwaysLeader {
    fn get_token(&self) -> LeaderToken {
        LeaderToken(self.counter.fetch_add(1, Ordering::SeqCst))
    }

    fn is_leader(&self, _token: &LeaderToken) -> bool {
        true
    }
}

/// Accepts every job; tests that need rejection swap in a custom checker or
/// call [`FakeSubmitChecker::reject`] to blocklist specific job ids.
#[derive(Default)]
pub struct FakeSubmitChecker {
    rejected: Mutex<BTreeMap<String, String>>,
}

impl FakeSubmitChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, job_id: &str, reason: &str) {
        self.rejected.lock().insert(job_id.to_string(), reason.to_string());
    }
}

#[async_trait]
impl SubmitChecker for FakeSubmitChecker {
    async fn check(&self, jobs: &[Job]) -> Result<BTreeMap<String, SubmitCheckResult>, CycleError> {
        let rejected = self.rejected.lock();
        Ok(jobs
            .iter()
            .map(|job| {
                let result = match rejected.get(&job.job_id) {
                    Some(reason) => SubmitCheckResult {
                        schedulable: false,
                        reason: Some(reason.clone()),
                    },
                    None => SubmitCheckResult {
                        schedulable: true,
                        reason: None,
                    },
                };
                (job.job_id.clone(), result)
            })
            .collect())
    }
}

/// Empty bid-price feed; tests that exercise the pricing overlay construct
/// their own snapshot directly (SPEC_FULL.md §2).
pub struct FakeBidPriceProvider;

#[async_trait]
impl BidPriceProvider for FakeBidPriceProvider {
    async fn get_bid_prices(&self) -> Result<BidPriceSnapshot, CycleError> {
        Ok(BidPriceSnapshot {
            prices: BTreeMap::new(),
            observed_at: 0,
        })
    }
}

pub fn flat_bid_price_snapshot(queue: &str, price_band: &str, pool: &str, bid: BidPrice, observed_at: i64) -> BidPriceSnapshot {
    let mut prices = BTreeMap::new();
    prices.insert((queue.to_string(), price_band.to_string(), pool.to_string()), bid);
    BidPriceSnapshot { prices, observed_at }
}

/// A clock a test can advance deterministically instead of reading the wall
/// clock (spec.md §6).
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self { now: AtomicI64::new(start) }
    }

    pub fn set(&self, value: i64) {
        self.now.store(value, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: i64) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Bundles a default set of fakes for a quick `Cycle` under test.
pub struct FakeCollaborators {
    pub job_repository: Arc<FakeJobRepository>,
    pub executor_repository: Arc<FakeExecutorRepository>,
    pub publisher: Arc<RecordingPublisher>,
    pub leader_controller: Arc<AlwaysLeader>,
    pub submit_checker: Arc<FakeSubmitChecker>,
    pub clock: Arc<ManualClock>,
}

impl Default for FakeCollaborators {
    fn default() -> Self {
        Self {
            job_repository: Arc::new(FakeJobRepository::new()),
            executor_repository: Arc::new(FakeExecutorRepository::new()),
            publisher: Arc::new(RecordingPublisher::new()),
            leader_controller: Arc::new(AlwaysLeader::new()),
            submit_checker: Arc::new(FakeSubmitChecker::new()),
            clock: Arc::new(ManualClock::new(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_publisher_only_keeps_events_when_still_leader() {
        let publisher = RecordingPublisher::new();
        let sequences = vec![QueuedEventSequence {
            queue: "q1".to_string(),
            job_set: "set-a".to_string(),
            events: vec![],
        }];
        publisher.publish(sequences.clone(), &|| false).await.unwrap();
        assert!(publisher.take().is_empty());

        publisher.publish(sequences, &|| true).await.unwrap();
        assert_eq!(publisher.take().len(), 1);
    }

    #[test]
    fn always_leader_reports_every_token_as_leading() {
        let leader = AlwaysLeader::new();
        let token = leader.get_token();
        assert!(leader.is_leader(&token));
    }
}
