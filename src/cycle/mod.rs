//! The leader-elected reconciliation loop (spec.md §4.6).

pub mod events;
pub mod interfaces;

use crate::context::SchedulingContext;
use crate::error::{CycleError, JobErrorReason};
use crate::gang::rate_limiter::TokenBucket;
use crate::gang::GangScheduler;
use crate::jobdb::job::{Job, JobRun, NodeAntiAffinity, PriorityClass, SchedulingMethod};
use crate::jobdb::JobDb;
use crate::nodedb::NodeDb;
use crate::queue::{PreemptingScheduler, PreemptingSchedulerConfig};
use crate::resources::{ResourceList, ResourceListFactory};
use events::{group_by_queue_and_job_set, Event};
use interfaces::{ExecutorRepository, JobRepository, JobRow, LeaderController, Publisher, RunDelta, RunRow, SubmitChecker};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub struct PoolConfig {
    pub name: String,
    pub total_resources: ResourceList,
    pub floating_resources: ResourceList,
    pub drf_multipliers: Vec<f64>,
    pub queue_weights: BTreeMap<String, f64>,
}

pub struct CycleConfig {
    pub executor_timeout_secs: i64,
    pub max_retries: u32,
    pub protected_fraction_of_fair_share: f64,
    pub max_scheduling_duration: Duration,
    pub maximum_scheduling_burst: usize,
    pub maximum_resource_fraction_to_schedule: BTreeMap<String, f64>,
    pub maximum_per_queue_resource_fraction: BTreeMap<String, f64>,
    pub maximum_scheduling_rate: f64,
    pub maximum_scheduling_burst_tokens: f64,
    pub maximum_per_queue_scheduling_rate: f64,
    pub maximum_per_queue_scheduling_burst: f64,
    pub pools: Vec<PoolConfig>,
}

/// Drives ingest → transition → schedule → emit → commit once per call to
/// [`Cycle::run`] (spec.md §4.6). Holds the two process-wide singletons plus
/// everything needed to talk to the outside world through the §6 trait
/// contracts.
pub struct Cycle {
    pub jobdb: JobDb,
    pub nodedb: NodeDb,
    pub factory: ResourceListFactory,
    pub priority_classes: BTreeMap<String, PriorityClass>,
    pub known_priority_classes: HashSet<String>,
    pub config: CycleConfig,

    pub job_repository: Arc<dyn JobRepository>,
    pub executor_repository: Arc<dyn ExecutorRepository>,
    pub publisher: Arc<dyn Publisher>,
    pub leader_controller: Arc<dyn LeaderController>,
    pub submit_checker: Arc<dyn SubmitChecker>,
    pub clock: Arc<dyn interfaces::Clock>,

    last_job_serial: i64,
    last_run_serial: i64,
    global_rate_limiter: TokenBucket,
    per_queue_rate_limiters: BTreeMap<String, TokenBucket>,
}

impl Cycle {
    pub fn new(
        jobdb: JobDb,
        nodedb: NodeDb,
        factory: ResourceListFactory,
        priority_classes: BTreeMap<String, PriorityClass>,
        config: CycleConfig,
        job_repository: Arc<dyn JobRepository>,
        executor_repository: Arc<dyn ExecutorRepository>,
        publisher: Arc<dyn Publisher>,
        leader_controller: Arc<dyn LeaderController>,
        submit_checker: Arc<dyn SubmitChecker>,
        clock: Arc<dyn interfaces::Clock>,
    ) -> Self {
        let known_priority_classes = priority_classes.keys().cloned().collect();
        let global_rate_limiter = TokenBucket::new(config.maximum_scheduling_burst_tokens, config.maximum_scheduling_rate);
        Self {
            jobdb,
            nodedb,
            factory,
            priority_classes,
            known_priority_classes,
            config,
            job_repository,
            executor_repository,
            publisher,
            leader_controller,
            submit_checker,
            clock,
            last_job_serial: 0,
            last_run_serial: 0,
            global_rate_limiter,
            per_queue_rate_limiters: BTreeMap::new(),
        }
    }

    /// Runs one full cycle (spec.md §4.6 steps 1–7). Infrastructure errors
    /// bubble out with the JobDb left at its pre-cycle snapshot; per-job
    /// failures never surface here (spec.md §7).
    pub async fn run(&mut self) -> Result<(), CycleError> {
        let leader_token = self.leader_controller.get_token();
        let is_leader = self.leader_controller.is_leader(&leader_token);

        let mut write_txn = self.jobdb.write_txn();
        let mut pending_events: Vec<(String, String, Event)> = Vec::new();

        self.sync_state(&mut write_txn, &mut pending_events).await?;
        self.expire_stale_executors(&mut write_txn, &mut pending_events).await?;
        self.process_transitions(&mut write_txn, &mut pending_events)?;
        self.submit_check(&mut write_txn, &mut pending_events).await?;

        if is_leader {
            self.schedule(&mut write_txn, &mut pending_events)?;
        }

        let sequences = group_by_queue_and_job_set(pending_events);
        let leader_controller = self.leader_controller.clone();
        let should_publish = move || leader_controller.is_leader(&leader_token);

        match self.publisher.publish(sequences, &should_publish).await {
            Ok(()) => write_txn.commit().map_err(CycleError::from),
            Err(e) => {
                write_txn.abort();
                Err(e)
            }
        }
    }

    /// Step 1 (spec.md §4.6): merge catalog deltas into the JobDb.
    async fn sync_state(&mut self, txn: &mut crate::jobdb::WriteTxn<'_>, _events: &mut Vec<(String, String, Event)>) -> Result<(), CycleError> {
        let (job_rows, run_rows, max_job_serial, max_run_serial) = self
            .job_repository
            .fetch_updates(self.last_job_serial, self.last_run_serial)
            .await?;

        let mut touched: BTreeMap<String, Job> = BTreeMap::new();
        for row in job_rows {
            match row {
                JobRow::New(job) => {
                    touched.insert(job.job_id.clone(), job);
                }
                JobRow::Delta(delta) => {
                    let existing = touched
                        .get(&delta.job_id)
                        .cloned()
                        .or_else(|| txn.get_by_id(&delta.job_id).ok().flatten().map(|j| (*j).clone()));
                    if let Some(mut job) = existing {
                        if delta.queued_version > job.queued_version {
                            job.queued_version = delta.queued_version;
                            if let Some(q) = delta.queued {
                                job.queued = q;
                            }
                        }
                        if let Some(c) = delta.cancel_requested {
                            job.cancel_requested = c;
                        }
                        if let Some(c) = delta.cancel_by_job_set_requested {
                            job.cancel_by_job_set_requested = c;
                        }
                        if let Some(v) = delta.validated {
                            job.validated = v;
                        }
                        touched.insert(job.job_id.clone(), job);
                    }
                }
            }
        }

        for row in run_rows {
            match row {
                RunRow::New(run) => {
                    let existing = touched
                        .get(&run.job_id)
                        .cloned()
                        .or_else(|| txn.get_by_id(&run.job_id).ok().flatten().map(|j| (*j).clone()));
                    if let Some(mut job) = existing {
                        job.runs.push(run);
                        touched.insert(job.job_id.clone(), job);
                    }
                }
                RunRow::Delta(delta) => {
                    let owning = txn
                        .get_by_run_id(&delta.run_id)
                        .ok()
                        .flatten()
                        .map(|j| (*j).clone())
                        .or_else(|| touched.values().find(|j| j.runs.iter().any(|r| r.run_id == delta.run_id)).cloned());
                    if let Some(mut job) = owning {
                        if let Some(run) = job.runs.iter_mut().find(|r| r.run_id == delta.run_id) {
                            apply_run_delta(run, &delta);
                        }
                        touched.insert(job.job_id.clone(), job);
                    }
                }
            }
        }

        txn.upsert(touched.into_values().collect(), &self.known_priority_classes)?;
        self.last_job_serial = self.last_job_serial.max(max_job_serial);
        self.last_run_serial = self.last_run_serial.max(max_run_serial);
        Ok(())
    }

    /// Step 2 (spec.md §4.6): mark runs on stale executors failed.
    async fn expire_stale_executors(
        &mut self,
        txn: &mut crate::jobdb::WriteTxn<'_>,
        events: &mut Vec<(String, String, Event)>,
    ) -> Result<(), CycleError> {
        let last_seen = self.executor_repository.get_last_update_times().await?;
        let now = self.clock.now();
        let stale: Vec<String> = last_seen
            .into_iter()
            .filter(|(_, t)| now - *t > self.config.executor_timeout_secs)
            .map(|(executor, _)| executor)
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        let mut touched = Vec::new();
        for job_id in txn.working_state().jobs.keys().cloned().collect::<Vec<_>>() {
            let job = match txn.get_by_id(&job_id)? {
                Some(j) => j,
                None => continue,
            };
            if !job.has_active_run() {
                continue;
            }
            let mut job = (*job).clone();
            let mut changed = false;
            for run in job.runs.iter_mut() {
                if run.running && stale.contains(&run.executor) {
                    run.failed = true;
                    run.running = false;
                    changed = true;
                    events.push((
                        job.queue.clone(),
                        job.job_set.clone(),
                        Event::JobRunErrors {
                            run_id: run.run_id.clone(),
                            job_id: job.job_id.clone(),
                            errors: vec![JobErrorReason::ExecutorStale],
                        },
                    ));
                }
            }
            if changed {
                touched.push(job);
            }
        }
        txn.upsert(touched, &self.known_priority_classes)?;
        Ok(())
    }

    /// Step 3 (spec.md §4.6): react to terminal/returned run states —
    /// cancellation, lease-return requeue (with synthesised anti-affinity for
    /// an attempted run), fail-fast termination, retry-limit exhaustion, and
    /// success.
    fn process_transitions(&mut self, txn: &mut crate::jobdb::WriteTxn<'_>, events: &mut Vec<(String, String, Event)>) -> Result<(), CycleError> {
        let job_ids: Vec<String> = txn.working_state().jobs.keys().cloned().collect();
        let mut touched: BTreeMap<String, Job> = BTreeMap::new();
        let mut cascaded: HashSet<String> = HashSet::new();

        for job_id in &job_ids {
            if cascaded.contains(job_id) {
                continue;
            }
            let job = match txn.get_by_id(job_id)? {
                Some(j) => j,
                None => continue,
            };
            if job.terminal() {
                continue;
            }

            // A catalog-requested preemption (e.g. a revoked spot node) is
            // terminal for the whole gang, unlike scheduler-driven fair-share
            // eviction, which requeues (spec.md §8 scenario 3).
            if let Some(run) = job.latest_run() {
                if run.preempt_requested && !run.terminal() {
                    let read_view = txn.read_view();
                    let gang_job_ids = self.jobdb.get_gang_job_ids_by_gang_id(&read_view, &job.queue, &job.gang_info.gang_id)?;
                    for member_id in gang_job_ids {
                        if cascaded.contains(&member_id) {
                            continue;
                        }
                        let member = touched
                            .get(&member_id)
                            .cloned()
                            .or_else(|| txn.get_by_id(&member_id).ok().flatten().map(|j| (*j).clone()));
                        let mut member = match member {
                            Some(m) if !m.terminal() => m,
                            _ => continue,
                        };
                        if let Some(active) = member.runs.iter_mut().rev().find(|r| !r.terminal()) {
                            active.preempt_requested = true;
                            active.failed = true;
                            active.running = false;
                            events.push((
                                member.queue.clone(),
                                member.job_set.clone(),
                                Event::JobRunPreempted {
                                    preempted_run_id: active.run_id.clone(),
                                    preempted_job_id: member.job_id.clone(),
                                },
                            ));
                            events.push((
                                member.queue.clone(),
                                member.job_set.clone(),
                                Event::JobRunErrors {
                                    run_id: active.run_id.clone(),
                                    job_id: member.job_id.clone(),
                                    errors: vec![JobErrorReason::JobRunPreemptedError],
                                },
                            ));
                        }
                        member.failed = true;
                        member.queued = false;
                        events.push((
                            member.queue.clone(),
                            member.job_set.clone(),
                            Event::JobErrors {
                                job_id: member.job_id.clone(),
                                errors: vec![JobErrorReason::JobRunPreemptedError],
                            },
                        ));
                        cascaded.insert(member_id.clone());
                        touched.insert(member_id, member);
                    }
                    continue;
                }
            }

            let mut job = (*job).clone();
            let mut changed = false;

            if job.cancel_requested || job.cancel_by_job_set_requested {
                for run in job.runs.iter_mut().filter(|r| !r.terminal()) {
                    run.cancelled = true;
                    run.running = false;
                    events.push((
                        job.queue.clone(),
                        job.job_set.clone(),
                        Event::JobRunCancelled {
                            run_id: run.run_id.clone(),
                            job_id: job.job_id.clone(),
                        },
                    ));
                }
                job.cancelled = true;
                job.queued = false;
                events.push((job.queue.clone(), job.job_set.clone(), Event::CancelledJob { job_id: job.job_id.clone() }));
                touched.insert(job.job_id.clone(), job);
                continue;
            }

            if let Some(run) = job.runs.last().cloned() {
                if run.succeeded {
                    job.succeeded = true;
                    job.queued = false;
                    events.push((job.queue.clone(), job.job_set.clone(), Event::JobSucceeded { job_id: job.job_id.clone() }));
                    changed = true;
                } else if run.returned || run.failed {
                    job.max_retries_seen += 1;
                    if job.fail_fast || job.max_retries_seen > self.config.max_retries {
                        job.failed = true;
                        job.queued = false;
                        let reason = if job.max_retries_seen > self.config.max_retries {
                            JobErrorReason::MaxRunsExceeded
                        } else {
                            JobErrorReason::PodLeaseReturned
                        };
                        events.push((
                            job.queue.clone(),
                            job.job_set.clone(),
                            Event::JobErrors {
                                job_id: job.job_id.clone(),
                                errors: vec![reason],
                            },
                        ));
                    } else {
                        if run.attempted {
                            requeue_with_antiaffinity(&mut job, &run.node_id);
                        } else {
                            job.queued = true;
                            job.queued_version += 1;
                        }
                        events.push((
                            job.queue.clone(),
                            job.job_set.clone(),
                            Event::JobRequeued {
                                job_id: job.job_id.clone(),
                                scheduling_info: job.scheduling_info.clone(),
                            },
                        ));
                    }
                    changed = true;
                }
            }

            if changed {
                touched.insert(job.job_id.clone(), job);
            }
        }

        txn.upsert(touched.into_values().collect(), &self.known_priority_classes)?;
        Ok(())
    }

    /// Step 4 (spec.md §4.6): pass unvalidated jobs through the submit
    /// checker.
    async fn submit_check(&mut self, txn: &mut crate::jobdb::WriteTxn<'_>, events: &mut Vec<(String, String, Event)>) -> Result<(), CycleError> {
        let read_view = txn.read_view();
        let unvalidated = self.jobdb.unvalidated_jobs(&read_view)?;
        if unvalidated.is_empty() {
            return Ok(());
        }
        let jobs: Vec<Job> = unvalidated.iter().map(|j| (**j).clone()).collect();
        let results = self.submit_checker.check(&jobs).await?;

        let mut touched = Vec::new();
        for mut job in jobs {
            match results.get(&job.job_id) {
                Some(r) if r.schedulable => {
                    job.validated = true;
                    events.push((job.queue.clone(), job.job_set.clone(), Event::JobValidated { job_id: job.job_id.clone() }));
                    touched.push(job);
                }
                Some(r) => {
                    let reason = r.reason.clone().unwrap_or_default();
                    job.failed = true;
                    job.queued = false;
                    events.push((
                        job.queue.clone(),
                        job.job_set.clone(),
                        Event::JobErrors {
                            job_id: job.job_id.clone(),
                            errors: vec![JobErrorReason::UnschedulableByChecker(reason)],
                        },
                    ));
                    touched.push(job);
                }
                None => {}
            }
        }
        txn.upsert(touched, &self.known_priority_classes)?;
        Ok(())
    }

    /// Seeds a freshly built [`SchedulingContext`]'s per-queue
    /// `initial_allocated`/`demand`/`constrained_demand` from the jobs
    /// already running or queued in `pool`, so `drf_cost`/`adjusted_fair_shares`
    /// reflect standing allocation rather than only what this round
    /// schedules (spec.md §4.4, §4.7 step 1: fair-share eviction compares
    /// against each queue's *current* share).
    fn seed_scheduling_context(&self, ctx: &mut SchedulingContext, jobdb_read: &crate::jobdb::ReadTxn, pool: &str) -> Result<(), CycleError> {
        for job in self.jobdb.running_jobs_in_pool(jobdb_read, pool)? {
            let request = job.requests(&self.factory);
            if let Some(q) = ctx.queues.get_mut(&job.queue) {
                q.initial_allocated = q.initial_allocated.add(&request);
                q.demand = q.demand.add(&request);
                q.constrained_demand = q.constrained_demand.add(&request);
            }
        }
        for queue in ctx.queues.keys().cloned().collect::<Vec<_>>() {
            let queued = self.jobdb.queued_jobs(jobdb_read, &queue, pool)?;
            let mut extra = self.factory.zero();
            for job in &queued {
                extra = extra.add(&job.requests(&self.factory));
            }
            if let Some(q) = ctx.queues.get_mut(&queue) {
                q.demand = q.demand.add(&extra);
                q.constrained_demand = q.constrained_demand.add(&extra);
            }
        }
        Ok(())
    }

    /// Step 5–6 (spec.md §4.6): run the preempting scheduler per pool and
    /// turn its decisions into events.
    fn schedule(&mut self, txn: &mut crate::jobdb::WriteTxn<'_>, events: &mut Vec<(String, String, Event)>) -> Result<(), CycleError> {
        let pools: Vec<PoolConfig> = std::mem::take(&mut self.config.pools);
        for pool in &pools {
            let mut ctx = SchedulingContext::new(pool.name.clone(), self.factory.clone(), pool.total_resources.clone(), pool.drf_multipliers.clone());
            for (queue, weight) in &pool.queue_weights {
                ctx.add_queue(queue, *weight);
            }

            let mut gang_scheduler = GangScheduler::new(
                self.factory.clone(),
                pool.total_resources.clone(),
                self.config.maximum_scheduling_burst,
                self.config.maximum_resource_fraction_to_schedule.clone(),
                self.config.maximum_per_queue_resource_fraction.clone(),
                pool.floating_resources.clone(),
            );

            let mut node_txn = self.nodedb.write_txn();
            let jobdb_read = txn.read_view();
            self.seed_scheduling_context(&mut ctx, &jobdb_read, &pool.name)?;
            let result = {
                let mut scheduler = PreemptingScheduler {
                    config: PreemptingSchedulerConfig {
                        protected_fraction_of_fair_share: self.config.protected_fraction_of_fair_share,
                        max_scheduling_duration: self.config.max_scheduling_duration,
                    },
                    global_rate_limiter: &mut self.global_rate_limiter,
                    per_queue_rate_limiters: &mut self.per_queue_rate_limiters,
                    default_queue_rate_limiter: (self.config.maximum_per_queue_scheduling_rate, self.config.maximum_per_queue_scheduling_burst),
                };
                scheduler.run(&mut node_txn, &mut ctx, &mut gang_scheduler, &self.jobdb, &jobdb_read, &pool.name, &self.priority_classes)
            };
            node_txn.commit()?;

            for scheduled in &result.scheduled {
                for (job_id, placement) in scheduled.job_ids.iter().zip(&scheduled.placements) {
                    if let Some(job) = txn.get_by_id(job_id)? {
                        let mut job = (*job).clone();
                        job.queued = false;
                        job.queued_version += 1;
                        let run_id = format!("{job_id}-run-{}", job.runs.len());
                        let run = JobRun {
                            run_id: run_id.clone(),
                            job_id: job_id.clone(),
                            executor: String::new(),
                            node_id: placement.node_id.clone(),
                            node_name: placement.node_id.clone(),
                            pool: pool.name.clone(),
                            created_at: self.clock.now(),
                            scheduled_at_priority: placement.scheduled_at_priority,
                            scheduling_method: placement.method,
                            running: false,
                            succeeded: false,
                            failed: false,
                            returned: false,
                            cancelled: false,
                            attempted: false,
                            preempt_requested: false,
                            pending: true,
                        };
                        job.runs.push(run);
                        events.push((
                            job.queue.clone(),
                            job.job_set.clone(),
                            Event::JobRunLeased {
                                run_id,
                                job_id: job_id.clone(),
                                executor_id: String::new(),
                                node_id: placement.node_id.clone(),
                                scheduled_at_priority: placement.scheduled_at_priority,
                                pool: pool.name.clone(),
                                pod_requirements_overlay: if matches!(placement.method, SchedulingMethod::Away) {
                                    Some("away".to_string())
                                } else {
                                    None
                                },
                            },
                        ));
                        txn.upsert(vec![job], &self.known_priority_classes)?;
                    }
                }
            }

            for preempted in &result.preempted {
                if let Some(job) = txn.get_by_id(&preempted.job_id)? {
                    let mut job = (*job).clone();
                    let evicted_node_id = job
                        .runs
                        .iter_mut()
                        .find(|r| r.run_id == preempted.run_id)
                        .map(|run| {
                            run.preempt_requested = true;
                            run.failed = true;
                            run.running = false;
                            run.node_id.clone()
                        })
                        .unwrap_or_default();
                    events.push((
                        job.queue.clone(),
                        job.job_set.clone(),
                        Event::JobRunPreempted {
                            preempted_run_id: preempted.run_id.clone(),
                            preempted_job_id: preempted.job_id.clone(),
                        },
                    ));
                    events.push((
                        job.queue.clone(),
                        job.job_set.clone(),
                        Event::JobRunErrors {
                            run_id: preempted.run_id.clone(),
                            job_id: preempted.job_id.clone(),
                            errors: vec![JobErrorReason::JobRunPreemptedError],
                        },
                    ));
                    requeue_with_antiaffinity(&mut job, &evicted_node_id);
                    events.push((
                        job.queue.clone(),
                        job.job_set.clone(),
                        Event::JobRequeued {
                            job_id: job.job_id.clone(),
                            scheduling_info: job.scheduling_info.clone(),
                        },
                    ));
                    txn.upsert(vec![job], &self.known_priority_classes)?;
                }
            }
        }
        self.config.pools = pools;
        Ok(())
    }
}

fn apply_run_delta(run: &mut JobRun, delta: &RunDelta) {
    if let Some(v) = delta.running {
        run.running = v;
    }
    if let Some(v) = delta.succeeded {
        run.succeeded = v;
    }
    if let Some(v) = delta.failed {
        run.failed = v;
    }
    if let Some(v) = delta.returned {
        run.returned = v;
    }
    if let Some(v) = delta.cancelled {
        run.cancelled = v;
    }
    if let Some(v) = delta.attempted {
        run.attempted = v;
    }
    if let Some(v) = delta.preempt_requested {
        run.preempt_requested = v;
    }
    if let Some(v) = delta.pending {
        run.pending = v;
    }
}

/// Appends the node anti-affinity synthesised when an attempted run is
/// lease-returned or preempted and the job is requeued (spec.md §4.6 step 3),
/// bumping the scheduling info version.
pub fn requeue_with_antiaffinity(job: &mut Job, node_id: &str) {
    job.scheduling_info.version += 1;
    job.scheduling_info
        .pod_requirements
        .node_anti_affinities
        .push(NodeAntiAffinity { node_id: node_id.to_string() });
    job.queued = true;
    job.queued_version += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobdb::job::{GangInfo, PodRequirements, SchedulingInfo};
    use crate::resources::ResourceListFactory;
    use crate::testkit::FakeCollaborators;
    use std::collections::HashSet as StdHashSet;

    fn factory() -> ResourceListFactory {
        ResourceListFactory::new(vec![("cpu".into(), 1)]).unwrap()
    }

    fn priority_classes() -> BTreeMap<String, PriorityClass> {
        let mut m = BTreeMap::new();
        m.insert(
            "pc0".to_string(),
            PriorityClass {
                name: "pc0".to_string(),
                priority: 1,
                preemptible: true,
                away_node_types: vec![],
            },
        );
        m
    }

    fn sample_job(id: &str, queue: &str) -> Job {
        Job {
            job_id: id.to_string(),
            queue: queue.to_string(),
            job_set: "set-a".to_string(),
            priority: 1,
            submitted_time: 100,
            priority_class_name: "pc0".to_string(),
            scheduling_info: SchedulingInfo {
                version: 0,
                priority_class_name: "pc0".to_string(),
                priority_class_name_override: None,
                pod_requirements: PodRequirements {
                    resource_requests: BTreeMap::from([("cpu".to_string(), 2)]),
                    ..Default::default()
                },
            },
            gang_info: GangInfo::singleton(id),
            queued: true,
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

    fn cycle_config(pool_name: &str, factory: &ResourceListFactory) -> CycleConfig {
        CycleConfig {
            executor_timeout_secs: 60,
            max_retries: 3,
            protected_fraction_of_fair_share: 1.0,
            max_scheduling_duration: Duration::from_secs(5),
            maximum_scheduling_burst: 100,
            maximum_resource_fraction_to_schedule: BTreeMap::new(),
            maximum_per_queue_resource_fraction: BTreeMap::new(),
            maximum_scheduling_rate: 1000.0,
            maximum_scheduling_burst_tokens: 1000.0,
            maximum_per_queue_scheduling_rate: 1000.0,
            maximum_per_queue_scheduling_burst: 1000.0,
            pools: vec![PoolConfig {
                name: pool_name.to_string(),
                total_resources: factory.from_pairs(&[("cpu", 16)]).unwrap(),
                floating_resources: factory.zero(),
                drf_multipliers: vec![1.0],
                queue_weights: BTreeMap::from([("q1".to_string(), 1.0)]),
            }],
        }
    }

    #[test]
    fn requeue_with_antiaffinity_bumps_version_and_requeues() {
        let mut job = sample_job("j1", "q1");
        job.queued = false;
        requeue_with_antiaffinity(&mut job, "node-7");
        assert_eq!(job.scheduling_info.version, 1);
        assert_eq!(job.scheduling_info.pod_requirements.node_anti_affinities.len(), 1);
        assert_eq!(job.scheduling_info.pod_requirements.node_anti_affinities[0].node_id, "node-7");
        assert!(job.queued);
        assert_eq!(job.queued_version, 1);
    }

    #[test]
    fn apply_run_delta_only_touches_present_fields() {
        let mut run = JobRun {
            run_id: "r1".to_string(),
            job_id: "j1".to_string(),
            executor: "exec-1".to_string(),
            node_id: "n1".to_string(),
            node_name: "n1".to_string(),
            pool: "pool-a".to_string(),
            created_at: 0,
            scheduled_at_priority: 1,
            scheduling_method: SchedulingMethod::Home,
            running: true,
            succeeded: false,
            failed: false,
            returned: false,
            cancelled: false,
            attempted: true,
            preempt_requested: false,
            pending: false,
        };
        let delta = RunDelta {
            run_id: "r1".to_string(),
            job_id: "j1".to_string(),
            failed: Some(true),
            running: Some(false),
            ..Default::default()
        };
        apply_run_delta(&mut run, &delta);
        assert!(run.failed);
        assert!(!run.running);
        // untouched fields keep their prior values.
        assert!(run.attempted);
        assert!(!run.cancelled);
    }

    #[tokio::test]
    async fn leases_a_queued_job_onto_a_node_with_capacity() {
        let factory = factory();
        let jobdb = JobDb::new(factory.clone(), false);
        let nodedb = NodeDb::new(factory.clone());
        nodedb
            .upsert(vec![crate::nodedb::Node::new(
                "n1".to_string(),
                "type-a".to_string(),
                0,
                "exec-1".to_string(),
                "n1".to_string(),
                vec![],
                BTreeMap::new(),
                factory.from_pairs(&[("cpu", 16)]).unwrap(),
                &[1],
            )])
            .unwrap();

        let known: StdHashSet<String> = priority_classes().keys().cloned().collect();
        {
            let mut write = jobdb.write_txn();
            write.upsert(vec![sample_job("j1", "q1")], &known).unwrap();
            write.commit().unwrap();
        }

        let fakes = FakeCollaborators::default();
        let mut cycle = Cycle::new(
            jobdb,
            nodedb,
            factory.clone(),
            priority_classes(),
            cycle_config("pool-a", &factory),
            fakes.job_repository.clone(),
            fakes.executor_repository.clone(),
            fakes.publisher.clone(),
            fakes.leader_controller.clone(),
            fakes.submit_checker.clone(),
            fakes.clock.clone(),
        );

        cycle.run().await.unwrap();

        let published = fakes.publisher.take();
        let leased = published
            .iter()
            .flat_map(|seq| seq.events.iter())
            .any(|e| matches!(e, Event::JobRunLeased { job_id, .. } if job_id == "j1"));
        assert!(leased, "expected a JobRunLeased event for j1, got {published:?}");

        let read = cycle.jobdb.read_txn();
        let job = cycle.jobdb.get_by_id(&read, "j1").unwrap().unwrap();
        assert!(!job.queued);
        assert_eq!(job.runs.len(), 1);
        assert!(job.runs[0].pending);
    }
}
