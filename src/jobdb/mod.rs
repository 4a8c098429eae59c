//! Transactional in-memory job catalog (spec.md §4.2).

pub mod interner;
pub mod job;
pub mod order;
pub(crate) mod state;
mod txn;

pub use job::*;
pub use order::OrderKey;
pub use txn::{ReadTxn, WriteTxn};

use crate::error::JobDbError;
use crate::resources::ResourceListFactory;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use state::JobDbState;
use std::sync::Arc;

/// Process-wide job catalog singleton (spec.md §5 "Shared resources").
/// Single-writer / multi-reader: at most one [`WriteTxn`] may be open at a
/// time; any number of [`ReadTxn`]s may be open concurrently, each pinned to
/// the snapshot committed as of when it was opened.
pub struct JobDb {
    shared: txn::Shared,
}

impl JobDb {
    pub fn new(factory: ResourceListFactory, prefer_large_jobs: bool) -> Self {
        Self {
            shared: txn::Shared {
                committed: ArcSwap::from_pointee(JobDbState::default()),
                write_lock: Mutex::new(()),
                factory,
                prefer_large_jobs,
            },
        }
    }

    /// Opens the single write transaction. Blocks the calling thread if
    /// another write transaction is currently outstanding (spec.md §4.2).
    pub fn write_txn(&self) -> WriteTxn<'_> {
        let guard = self.shared.write_lock.lock();
        WriteTxn::new(&self.shared, guard)
    }

    /// Opens a read transaction pinned to the most recently committed
    /// snapshot (spec.md §4.2).
    pub fn read_txn(&self) -> ReadTxn {
        ReadTxn::new(self.shared.committed.load_full())
    }

    /// Lazy, restartable, finite iterator over jobs in `queue` eligible for
    /// `pool`, sorted by `FairShareOrder` (spec.md §4.2). "Restartable"
    /// means re-opening a fresh [`ReadTxn`] and calling this again yields a
    /// consistent re-iteration from the start (spec.md §9).
    pub fn queued_jobs(&self, txn: &ReadTxn, queue: &str, pool: &str) -> Result<Vec<Arc<job::Job>>, JobDbError> {
        let keys = txn
            .snapshot
            .indexes
            .queued_by_queue_pool
            .get(&(queue.to_string(), pool.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(keys
            .into_iter()
            .filter_map(|k| txn.snapshot.jobs.get(&k.job_id).cloned())
            .collect())
    }

    pub fn has_queued_jobs(&self, txn: &ReadTxn, queue: &str) -> Result<bool, JobDbError> {
        txn.has_queued_jobs(queue)
    }

    /// Iterator over jobs with `validated == false` (spec.md §4.2).
    pub fn unvalidated_jobs(&self, txn: &ReadTxn) -> Result<Vec<Arc<job::Job>>, JobDbError> {
        Ok(txn
            .snapshot
            .indexes
            .unvalidated
            .iter()
            .filter_map(|id| txn.snapshot.jobs.get(id).cloned())
            .collect())
    }

    pub fn get_gang_job_ids_by_gang_id(&self, txn: &ReadTxn, queue: &str, gang_id: &str) -> Result<Vec<String>, JobDbError> {
        txn.gang_job_ids(queue, gang_id)
    }

    pub fn get_by_id(&self, txn: &ReadTxn, job_id: &str) -> Result<Option<Arc<job::Job>>, JobDbError> {
        txn.get_by_id(job_id)
    }

    pub fn get_by_run_id(&self, txn: &ReadTxn, run_id: &str) -> Result<Option<Arc<job::Job>>, JobDbError> {
        txn.get_by_run_id(run_id)
    }

    /// All non-terminal jobs with an active run in `pool`, for the
    /// preempting scheduler's eviction pass (spec.md §4.7 step 1). Not named
    /// in spec.md §4.2's public contract list, but the eviction pass needs
    /// some way to enumerate running work per pool and the spec does not
    /// otherwise provide one.
    pub fn running_jobs_in_pool(&self, txn: &ReadTxn, pool: &str) -> Result<Vec<Arc<job::Job>>, JobDbError> {
        Ok(txn
            .snapshot
            .jobs
            .values()
            .filter(|j| j.has_active_run() && j.pools.iter().any(|p| p == pool))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceListFactory;
    use std::collections::HashSet;

    fn factory() -> ResourceListFactory {
        ResourceListFactory::new(vec![("cpu".into(), 1)]).unwrap()
    }

    fn sample_job(id: &str, queue: &str, priority: i32, submitted: i64, queued: bool) -> job::Job {
        job::Job {
            job_id: id.to_string(),
            queue: queue.to_string(),
            job_set: "set-a".to_string(),
            priority,
            submitted_time: submitted,
            priority_class_name: "pc0".to_string(),
            scheduling_info: job::SchedulingInfo {
                version: 0,
                priority_class_name: "pc0".to_string(),
                priority_class_name_override: None,
                pod_requirements: Default::default(),
            },
            gang_info: job::GangInfo::singleton(id),
            queued,
            queued_version: 0,
            cancel_requested: false,
            cancel_by_job_set_requested: false,
            cancelled: false,
            failed: false,
            succeeded: false,
            validated: true,
            runs: vec![],
            bid_prices: Default::default(),
            pools: vec!["pool-a".to_string()],
            fail_fast: false,
            max_retries_seen: 0,
        }
    }

    #[test]
    fn write_txn_is_invisible_until_commit() {
        let db = JobDb::new(factory(), false);
        let known = HashSet::from(["pc0".to_string()]);

        let pre_commit_read = db.read_txn();
        assert!(db.get_by_id(&pre_commit_read, "j1").unwrap().is_none());

        let mut write = db.write_txn();
        write.upsert(vec![sample_job("j1", "q1", 1, 100, true)], &known).unwrap();
        // The write txn sees its own uncommitted write.
        assert!(write.get_by_id("j1").unwrap().is_some());
        // A read txn opened before commit does not.
        assert!(db.get_by_id(&pre_commit_read, "j1").unwrap().is_none());

        write.commit().unwrap();

        let post_commit_read = db.read_txn();
        assert!(db.get_by_id(&post_commit_read, "j1").unwrap().is_some());
        assert!(db.get_by_id(&pre_commit_read, "j1").unwrap().is_none());
    }

    #[test]
    fn queued_jobs_are_ordered_by_fair_share_order() {
        let db = JobDb::new(factory(), false);
        let known = HashSet::from(["pc0".to_string()]);
        let mut write = db.write_txn();
        write
            .upsert(
                vec![
                    sample_job("b", "q1", 5, 100, true),
                    sample_job("a", "q1", 1, 200, true),
                    sample_job("z", "q1", 1, 100, true),
                ],
                &known,
            )
            .unwrap();
        write.commit().unwrap();

        let read = db.read_txn();
        let jobs = db.queued_jobs(&read, "q1", "pool-a").unwrap();
        let ids: Vec<_> = jobs.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "b"]);
    }

    #[test]
    fn non_monotone_queued_version_is_rejected() {
        let db = JobDb::new(factory(), false);
        let known = HashSet::from(["pc0".to_string()]);
        let mut write = db.write_txn();
        let mut j = sample_job("j1", "q1", 1, 100, true);
        j.queued_version = 3;
        write.upsert(vec![j], &known).unwrap();
        write.commit().unwrap();

        let mut write2 = db.write_txn();
        let mut j2 = sample_job("j1", "q1", 1, 100, true);
        j2.queued_version = 1;
        let err = write2.upsert(vec![j2], &known).unwrap_err();
        assert!(matches!(err, JobDbError::NonMonotoneQueuedVersion { .. }));
    }

    #[test]
    fn unknown_priority_class_is_rejected() {
        let db = JobDb::new(factory(), false);
        let known = HashSet::new();
        let mut write = db.write_txn();
        let err = write
            .upsert(vec![sample_job("j1", "q1", 1, 100, true)], &known)
            .unwrap_err();
        assert!(matches!(err, JobDbError::UnknownPriorityClass(_)));
    }

    #[test]
    fn operations_on_committed_txn_fail() {
        let db = JobDb::new(factory(), false);
        let write = db.write_txn();
        write.commit().unwrap();
        // handle consumed by commit(); re-acquiring a fresh write txn works.
        let _write2 = db.write_txn();
    }

    #[test]
    fn abort_leaves_committed_state_untouched() {
        let db = JobDb::new(factory(), false);
        let known = HashSet::from(["pc0".to_string()]);
        let mut write = db.write_txn();
        write.upsert(vec![sample_job("j1", "q1", 1, 100, true)], &known).unwrap();
        write.abort();

        let read = db.read_txn();
        assert!(db.get_by_id(&read, "j1").unwrap().is_none());
    }
}
