//! Write/read transaction handles over [`super::JobDb`] (spec.md §4.2).

use super::job::Job;
use super::state::JobDbState;
use crate::error::JobDbError;
use crate::resources::ResourceListFactory;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) struct Shared {
    pub(crate) committed: ArcSwap<JobDbState>,
    pub(crate) write_lock: Mutex<()>,
    pub(crate) factory: ResourceListFactory,
    pub(crate) prefer_large_jobs: bool,
}

/// A read-only snapshot taken at `readTxn()` time. Sees the state as of the
/// most recent commit prior to (or at) the moment it was opened; later
/// commits are invisible to it (spec.md §4.2).
pub struct ReadTxn {
    pub(crate) snapshot: Arc<JobDbState>,
    closed: AtomicBool,
}

impl ReadTxn {
    pub(crate) fn new(snapshot: Arc<JobDbState>) -> Self {
        Self {
            snapshot,
            closed: AtomicBool::new(false),
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn check_open(&self) -> Result<(), JobDbError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(JobDbError::TxnClosed)
        } else {
            Ok(())
        }
    }

    pub fn get_by_id(&self, job_id: &str) -> Result<Option<Arc<Job>>, JobDbError> {
        self.check_open()?;
        Ok(self.snapshot.jobs.get(job_id).cloned())
    }

    pub fn get_by_run_id(&self, run_id: &str) -> Result<Option<Arc<Job>>, JobDbError> {
        self.check_open()?;
        let job_id = self.snapshot.indexes.run_to_job.get(run_id);
        Ok(job_id.and_then(|id| self.snapshot.jobs.get(id)).cloned())
    }

    pub fn has_queued_jobs(&self, queue: &str) -> Result<bool, JobDbError> {
        self.check_open()?;
        Ok(self
            .snapshot
            .indexes
            .queued_by_queue_pool
            .range((queue.to_string(), String::new())..)
            .take_while(|((q, _), _)| q == queue)
            .any(|(_, set)| !set.is_empty()))
    }

    pub fn gang_job_ids(&self, queue: &str, gang_id: &str) -> Result<Vec<String>, JobDbError> {
        self.check_open()?;
        Ok(self
            .snapshot
            .indexes
            .gang_members
            .get(&(queue.to_string(), gang_id.to_string()))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

/// The single outstanding write transaction. Sees its own uncommitted
/// writes immediately; nothing else does until `commit()` (spec.md §4.2).
pub struct WriteTxn<'a> {
    shared: &'a Shared,
    working: JobDbState,
    _guard: parking_lot::MutexGuard<'a, ()>,
    closed: bool,
}

impl<'a> WriteTxn<'a> {
    pub(crate) fn new(shared: &'a Shared, guard: parking_lot::MutexGuard<'a, ()>) -> Self {
        let working = (**shared.committed.load()).clone();
        Self {
            shared,
            working,
            _guard: guard,
            closed: false,
        }
    }

    fn check_open(&self) -> Result<(), JobDbError> {
        if self.closed {
            Err(JobDbError::TxnClosed)
        } else {
            Ok(())
        }
    }

    /// Inserts or replaces jobs. Invariants enforced: `priorityClassName`
    /// must be known; `queuedVersion` must be non-decreasing for the same
    /// id (spec.md §4.2).
    pub fn upsert(&mut self, jobs: Vec<Job>, known_priority_classes: &std::collections::HashSet<String>) -> Result<(), JobDbError> {
        self.check_open()?;
        for job in jobs {
            if !known_priority_classes.contains(&job.priority_class_name) {
                return Err(JobDbError::UnknownPriorityClass(job.priority_class_name));
            }
            if let Some(existing) = self.working.jobs.get(&job.job_id) {
                if job.queued_version < existing.queued_version {
                    return Err(JobDbError::NonMonotoneQueuedVersion {
                        job_id: job.job_id,
                        previous: existing.queued_version,
                        attempted: job.queued_version,
                    });
                }
            }
            self.working
                .insert_job(job, &self.shared.factory, self.shared.prefer_large_jobs);
        }
        Ok(())
    }

    pub fn batch_delete(&mut self, ids: &[String]) -> Result<(), JobDbError> {
        self.check_open()?;
        for id in ids {
            self.working.remove_job(id);
        }
        Ok(())
    }

    pub fn get_by_id(&self, job_id: &str) -> Result<Option<Arc<Job>>, JobDbError> {
        self.check_open()?;
        Ok(self.working.jobs.get(job_id).cloned())
    }

    pub fn get_by_run_id(&self, run_id: &str) -> Result<Option<Arc<Job>>, JobDbError> {
        self.check_open()?;
        let job_id = self.working.indexes.run_to_job.get(run_id);
        Ok(job_id.and_then(|id| self.working.jobs.get(id)).cloned())
    }

    pub fn working_state(&self) -> &JobDbState {
        &self.working
    }

    /// A read-only snapshot of this transaction's uncommitted working state,
    /// for cycle steps that need to look up jobs mid-cycle before the
    /// transaction commits (spec.md §4.6 step 4 reads `unvalidatedJobs`;
    /// step 5 reads `queuedJobs`/running jobs against the synced state).
    pub fn read_view(&self) -> ReadTxn {
        ReadTxn::new(Arc::new(self.working.clone()))
    }

    /// Commits the transaction, making its writes visible to subsequently
    /// opened read transactions (spec.md §4.2). Consumes `self` so the
    /// handle cannot be reused afterwards.
    pub fn commit(mut self) -> Result<(), JobDbError> {
        self.check_open()?;
        let working = std::mem::take(&mut self.working);
        self.shared.committed.store(Arc::new(working));
        self.closed = true;
        Ok(())
    }

    /// Discards all writes; the committed state is untouched
    /// (spec.md §7: "A cycle that errors out leaves the JobDb at its
    /// pre-cycle snapshot").
    pub fn abort(mut self) {
        self.closed = true;
    }
}

impl<'a> Drop for WriteTxn<'a> {
    fn drop(&mut self) {
        self.closed = true;
    }
}
