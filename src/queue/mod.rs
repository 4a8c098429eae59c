//! Outer per-pool scheduling loop: candidate gang iterators, DRF-ordered
//! meta-iterator, fair-share eviction, and finalisation (spec.md §4.7).

use crate::context::SchedulingContext;
use crate::gang::rate_limiter::TokenBucket;
use crate::gang::{Gang, GangMember, GangScheduler};
use crate::jobdb::job::{AwayNodeType, Job, PodRequirements, PriorityClass};
use crate::jobdb::{JobDb, ReadTxn};
use crate::nodedb::{self, JobSchedulingRequest, SelectedNode};
use crate::resources::ResourceListFactory;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One member of a [`CandidateGang`], owned rather than borrowed from the
/// originating [`Job`] so the candidate list can outlive the read
/// transaction it was built from (spec.md §9: candidate iterators are
/// "lazy, finite, and restartable" — this crate materialises a round's
/// worth up front, which is restartable in the same sense: a fresh round
/// re-opens a fresh read transaction and rebuilds from scratch).
#[derive(Debug, Clone)]
pub struct CandidateGangMember {
    pub job_id: String,
    pub pod_requirements: PodRequirements,
    pub resource_request: crate::resources::ResourceList,
    pub target_node_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CandidateGang {
    pub queue: String,
    pub gang_id: String,
    pub priority_class_name: String,
    pub home_priority: i32,
    pub away_node_types: Vec<AwayNodeType>,
    pub scheduling_key: String,
    pub is_gang: bool,
    pub members: Vec<CandidateGangMember>,
}

/// Groups `queued` (already `FairShareOrder`-sorted) by `gangId`, preserving
/// each gang's first-occurrence position (spec.md §4.6 step 2, §4.7 step 2).
pub fn build_candidate_gangs(
    queued: &[Arc<Job>],
    priority_classes: &BTreeMap<String, PriorityClass>,
    factory: &ResourceListFactory,
) -> Vec<CandidateGang> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: BTreeMap<String, Vec<&Arc<Job>>> = BTreeMap::new();
    for job in queued {
        let key = job.gang_info.gang_id.clone();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(job);
    }

    order
        .into_iter()
        .filter_map(|gang_id| {
            let members_jobs = groups.remove(&gang_id)?;
            let first = members_jobs[0];
            let pc = priority_classes.get(&first.priority_class_name)?;
            let members = members_jobs
                .iter()
                .map(|j| CandidateGangMember {
                    job_id: j.job_id.clone(),
                    pod_requirements: j.scheduling_info.pod_requirements.clone(),
                    resource_request: j.requests(factory),
                    target_node_id: j.latest_run().map(|r| r.node_id.clone()),
                })
                .collect();
            Some(CandidateGang {
                queue: first.queue.clone(),
                gang_id,
                priority_class_name: first.priority_class_name.clone(),
                home_priority: pc.priority,
                away_node_types: pc.away_node_types.clone(),
                scheduling_key: first.scheduling_key(),
                is_gang: first.gang_info.is_gang(),
                members,
            })
        })
        .collect()
}

pub struct ScheduledGang {
    pub queue: String,
    pub job_ids: Vec<String>,
    pub placements: Vec<SelectedNode>,
}

/// A job evicted this round and not rescheduled: a true preemption decision
/// (spec.md §4.7 step 4).
pub struct PreemptionDecision {
    pub job_id: String,
    pub run_id: String,
    pub queue: String,
}

pub struct SchedulingRoundResult {
    pub scheduled: Vec<ScheduledGang>,
    pub preempted: Vec<PreemptionDecision>,
}

pub struct PreemptingSchedulerConfig {
    pub protected_fraction_of_fair_share: f64,
    pub max_scheduling_duration: Duration,
}

/// One pool's scheduling round (spec.md §4.7). Consumes a live [`GangScheduler`]
/// and rate limiters so the caller (the cycle) owns their lifetime across
/// rounds — rate limiter tokens accumulated between rounds must survive
/// (spec.md §5).
pub struct PreemptingScheduler<'a> {
    pub config: PreemptingSchedulerConfig,
    pub global_rate_limiter: &'a mut TokenBucket,
    pub per_queue_rate_limiters: &'a mut BTreeMap<String, TokenBucket>,
    pub default_queue_rate_limiter: (f64, f64),
}

impl<'a> PreemptingScheduler<'a> {
    /// Step 1: evict fair-share preemption candidates. For each queue whose
    /// allocation exceeds `protectedFractionOfFairShare * adjustedFairShare`,
    /// evicts its most-recent, lowest-priority runs (highest numeric
    /// priority value, then latest `createdAt`) until the excess is covered.
    pub fn evict_fair_share_candidates(
        &self,
        node_txn: &mut nodedb::WriteTxn<'_>,
        ctx: &mut SchedulingContext,
        jobdb: &JobDb,
        jobdb_txn: &ReadTxn,
        pool: &str,
    ) -> Vec<PreemptionDecision> {
        let shares = ctx.adjusted_fair_shares();
        let running = match jobdb.running_jobs_in_pool(jobdb_txn, pool) {
            Ok(jobs) => jobs,
            Err(_) => return Vec::new(),
        };

        let mut evicted = Vec::new();
        let queue_names: Vec<String> = ctx.queues.keys().cloned().collect();
        for queue in queue_names {
            let share = ctx.drf_cost(&queue);
            let adjusted = shares.demand_capped.get(&queue).copied().unwrap_or(0.0);
            let protected = adjusted * self.config.protected_fraction_of_fair_share;
            if share <= protected {
                continue;
            }

            let excess_fraction = share - protected;
            let target = ctx.total_resources.scale(excess_fraction).clip_negative();

            let mut queue_runs: Vec<&Arc<Job>> = running.iter().filter(|j| j.queue == queue).collect();
            // Lowest priority first (highest numeric value = lowest
            // priority, spec.md §3: "lower priority value schedules
            // earlier"); ties broken by most recent run first.
            queue_runs.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| {
                        let a_time = a.latest_run().map(|r| r.created_at).unwrap_or(0);
                        let b_time = b.latest_run().map(|r| r.created_at).unwrap_or(0);
                        b_time.cmp(&a_time)
                    })
            });

            let mut evicted_so_far = ctx.factory.zero();
            for job in queue_runs {
                if target.subtract(&evicted_so_far).clip_negative().is_zero() {
                    break;
                }
                let run = match job.latest_run() {
                    Some(r) if r.running => r,
                    _ => continue,
                };
                let request = job.requests(&ctx.factory);
                if node_txn
                    .evict_jobs_from_node(&run.node_id, &[(job.job_id.clone(), run.run_id.clone(), queue.clone())])
                    .is_err()
                {
                    continue;
                }
                ctx.record_eviction(&queue, &request);
                evicted_so_far = evicted_so_far.add(&request);
                evicted.push(PreemptionDecision {
                    job_id: job.job_id.clone(),
                    run_id: run.run_id.clone(),
                    queue: queue.clone(),
                });
            }
        }
        evicted
    }

    /// Steps 2–3: build per-queue candidate iterators, repeatedly offer the
    /// next gang from the lowest-DRF-cost-per-weight queue to `gang_scheduler`,
    /// until rate limits, caps, the deadline, or exhaustion stop the round.
    pub fn schedule_until_done(
        &mut self,
        node_txn: &mut nodedb::WriteTxn<'_>,
        ctx: &mut SchedulingContext,
        gang_scheduler: &mut GangScheduler,
        jobdb: &JobDb,
        jobdb_txn: &ReadTxn,
        pool: &str,
        priority_classes: &BTreeMap<String, PriorityClass>,
        rescheduled_job_ids: &mut std::collections::BTreeSet<String>,
    ) -> Vec<ScheduledGang> {
        let deadline = Instant::now() + self.config.max_scheduling_duration;
        let mut per_queue: BTreeMap<String, VecDeque<CandidateGang>> = BTreeMap::new();
        for queue in ctx.queues.keys().cloned().collect::<Vec<_>>() {
            let queued = jobdb.queued_jobs(jobdb_txn, &queue, pool).unwrap_or_default();
            let candidates = build_candidate_gangs(&queued, priority_classes, &ctx.factory);
            per_queue.insert(queue, candidates.into_iter().collect());
        }

        self.global_rate_limiter.sample();
        for bucket in self.per_queue_rate_limiters.values_mut() {
            bucket.sample();
        }

        let mut scheduled = Vec::new();
        loop {
            if Instant::now() >= deadline {
                break;
            }
            if self.global_rate_limiter.available() <= 0.0 {
                break;
            }

            let next_queue = per_queue
                .iter()
                .filter(|(_, deque)| !deque.is_empty())
                .map(|(q, _)| q.clone())
                .min_by(|a, b| {
                    ctx.drf_cost_per_weight(a)
                        .partial_cmp(&ctx.drf_cost_per_weight(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.cmp(b))
                });

            let queue = match next_queue {
                Some(q) => q,
                None => break,
            };

            let (rate, burst) = self.default_queue_rate_limiter;
            let bucket = self
                .per_queue_rate_limiters
                .entry(queue.clone())
                .or_insert_with(|| TokenBucket::new(burst, rate));
            if bucket.available() <= 0.0 {
                per_queue.remove(&queue);
                continue;
            }

            let candidate = match per_queue.get_mut(&queue).and_then(|d| d.pop_front()) {
                Some(c) => c,
                None => continue,
            };

            let members: Vec<GangMember<'_>> = candidate
                .members
                .iter()
                .map(|m| GangMember {
                    job_id: &m.job_id,
                    request: JobSchedulingRequest {
                        job_id: &m.job_id,
                        queue: &candidate.queue,
                        home_priority: candidate.home_priority,
                        pod_requirements: &m.pod_requirements,
                        away_node_types: &candidate.away_node_types,
                        target_node_id: m.target_node_id.as_deref(),
                        is_gang: candidate.is_gang,
                    },
                    resource_request: m.resource_request.clone(),
                })
                .collect();

            let gang = Gang {
                queue: &candidate.queue,
                priority_class_name: &candidate.priority_class_name,
                scheduling_key: &candidate.scheduling_key,
                members,
            };

            match gang_scheduler.try_schedule(node_txn, ctx, &gang) {
                Ok(placements) => {
                    self.global_rate_limiter.try_consume(1.0);
                    bucket.try_consume(1.0);
                    if let Some(q) = ctx.queues.get_mut(&queue) {
                        q.scheduled_gangs += 1;
                    }
                    for m in &candidate.members {
                        rescheduled_job_ids.insert(m.job_id.clone());
                    }
                    scheduled.push(ScheduledGang {
                        queue: candidate.queue.clone(),
                        job_ids: candidate.members.iter().map(|m| m.job_id.clone()).collect(),
                        placements,
                    });
                }
                Err(_) => continue,
            }
        }

        scheduled
    }

    /// Step 4: any evicted job absent from `rescheduled_job_ids` becomes a
    /// finalised preemption decision.
    pub fn finalize(evicted: Vec<PreemptionDecision>, rescheduled_job_ids: &std::collections::BTreeSet<String>) -> Vec<PreemptionDecision> {
        evicted.into_iter().filter(|e| !rescheduled_job_ids.contains(&e.job_id)).collect()
    }

    pub fn run(
        &mut self,
        node_txn: &mut nodedb::WriteTxn<'_>,
        ctx: &mut SchedulingContext,
        gang_scheduler: &mut GangScheduler,
        jobdb: &JobDb,
        jobdb_txn: &ReadTxn,
        pool: &str,
        priority_classes: &BTreeMap<String, PriorityClass>,
    ) -> SchedulingRoundResult {
        let evicted = self.evict_fair_share_candidates(node_txn, ctx, jobdb, jobdb_txn, pool);
        let mut rescheduled_job_ids = std::collections::BTreeSet::new();
        let scheduled = self.schedule_until_done(node_txn, ctx, gang_scheduler, jobdb, jobdb_txn, pool, priority_classes, &mut rescheduled_job_ids);
        let preempted = Self::finalize(evicted, &rescheduled_job_ids);
        SchedulingRoundResult { scheduled, preempted }
    }
}
