//! The committed snapshot backing both read and write transactions
//! (spec.md §4.2 "Snapshot semantics").

use super::job::Job;
use super::order::{order_key, OrderKey};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Secondary indexes kept alongside the primary `job_id -> Job` map. All
/// indexes are rebuilt incrementally on `upsert`/`batch_delete` so they stay
/// consistent with the primary map inside a single write transaction.
#[derive(Debug, Clone, Default)]
pub struct Indexes {
    /// `(queue, pool) -> ordered set of queued job keys`, restricted to jobs
    /// where `queued == true` and `pool` is in the job's pool list.
    pub queued_by_queue_pool: BTreeMap<(String, String), BTreeSet<OrderKey>>,
    pub run_to_job: BTreeMap<String, String>,
    /// `(queue, gang_id) -> job ids`.
    pub gang_members: BTreeMap<(String, String), BTreeSet<String>>,
    pub unvalidated: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct JobDbState {
    pub jobs: BTreeMap<String, Arc<Job>>,
    pub indexes: Indexes,
}

impl JobDbState {
    pub fn insert_job(&mut self, job: Job, factory: &crate::resources::ResourceListFactory, prefer_large_jobs: bool) {
        if let Some(old) = self.jobs.get(&job.job_id).cloned() {
            self.remove_from_indexes(&old);
        }
        self.add_to_indexes(&job, factory, prefer_large_jobs);
        self.jobs.insert(job.job_id.clone(), Arc::new(job));
    }

    pub fn remove_job(&mut self, job_id: &str) {
        if let Some(job) = self.jobs.remove(job_id) {
            self.remove_from_indexes(&job);
        }
    }

    fn add_to_indexes(&mut self, job: &Job, factory: &crate::resources::ResourceListFactory, prefer_large_jobs: bool) {
        for run in &job.runs {
            self.indexes.run_to_job.insert(run.run_id.clone(), job.job_id.clone());
        }
        if job.queued {
            let key = order_key(job, factory, prefer_large_jobs);
            for pool in &job.pools {
                self.indexes
                    .queued_by_queue_pool
                    .entry((job.queue.clone(), pool.clone()))
                    .or_default()
                    .insert(key.clone());
            }
            // Jobs queued against no specific pool yet are indexed under the
            // wildcard pool "" so `queuedJobs` can still find them.
            if job.pools.is_empty() {
                self.indexes
                    .queued_by_queue_pool
                    .entry((job.queue.clone(), String::new()))
                    .or_default()
                    .insert(key);
            }
        }
        if job.gang_info.is_gang() {
            self.indexes
                .gang_members
                .entry((job.queue.clone(), job.gang_info.gang_id.clone()))
                .or_default()
                .insert(job.job_id.clone());
        }
        if !job.validated {
            self.indexes.unvalidated.insert(job.job_id.clone());
        }
    }

    fn remove_from_indexes(&mut self, job: &Job) {
        for run in &job.runs {
            self.indexes.run_to_job.remove(&run.run_id);
        }
        if job.queued {
            let pools = if job.pools.is_empty() {
                vec![String::new()]
            } else {
                job.pools.clone()
            };
            for pool in pools {
                if let Some(set) = self.indexes.queued_by_queue_pool.get_mut(&(job.queue.clone(), pool.clone())) {
                    set.retain(|k| k.job_id != job.job_id);
                    if set.is_empty() {
                        self.indexes.queued_by_queue_pool.remove(&(job.queue.clone(), pool));
                    }
                }
            }
        }
        if job.gang_info.is_gang() {
            if let Some(set) = self
                .indexes
                .gang_members
                .get_mut(&(job.queue.clone(), job.gang_info.gang_id.clone()))
            {
                set.remove(&job.job_id);
                if set.is_empty() {
                    self.indexes.gang_members.remove(&(job.queue.clone(), job.gang_info.gang_id.clone()));
                }
            }
        }
        self.indexes.unvalidated.remove(&job.job_id);
    }
}
