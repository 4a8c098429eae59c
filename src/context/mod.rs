//! Per-round scheduling bookkeeping (spec.md §4.4).

pub mod fairshare;
pub mod pod;

pub use pod::{GangSchedulingContext, PodSchedulingContext, SchedulingOutcome};

use crate::resources::{ResourceList, ResourceListFactory};
use fairshare::{compute_adjusted_fair_shares, drf_cost, QueueShareInput};
use std::collections::{BTreeMap, BTreeSet};

/// Per-queue accumulators for a single round (spec.md §4.4). Beyond the
/// fair-share numbers spec.md names, also tracks scheduled/evicted gang
/// counts for reporting (SPEC_FULL.md §2, grounded on
/// `scheduling/context/scheduling.go`'s `SchedulingStats`-style counters).
#[derive(Debug, Clone)]
pub struct QueueSchedulingContext {
    pub queue: String,
    pub weight: f64,
    pub initial_allocated: ResourceList,
    pub allocated: ResourceList,
    pub evicted: ResourceList,
    pub demand: ResourceList,
    pub constrained_demand: ResourceList,
    pub scheduled_gangs: u32,
    pub evicted_gangs: u32,
}

impl QueueSchedulingContext {
    pub fn new(queue: String, weight: f64, zero: ResourceList) -> Self {
        Self {
            queue,
            weight,
            initial_allocated: zero.clone(),
            allocated: zero.clone(),
            evicted: zero.clone(),
            demand: zero.clone(),
            constrained_demand: zero.clone(),
            scheduled_gangs: 0,
            evicted_gangs: 0,
        }
    }

    pub fn total_allocated(&self) -> ResourceList {
        self.allocated.add(&self.initial_allocated)
    }
}

/// Bookkeeping for one pool's scheduling round (spec.md §4.4).
pub struct SchedulingContext {
    pub pool: String,
    pub factory: ResourceListFactory,
    pub total_resources: ResourceList,
    pub queues: BTreeMap<String, QueueSchedulingContext>,
    pub drf_multipliers: Vec<f64>,
    /// Scheduling keys marked globally unfeasible this round
    /// (spec.md §4.5).
    pub unfeasible_scheduling_keys: BTreeSet<String>,
}

impl SchedulingContext {
    pub fn new(pool: String, factory: ResourceListFactory, total_resources: ResourceList, drf_multipliers: Vec<f64>) -> Self {
        Self {
            pool,
            factory,
            total_resources,
            queues: BTreeMap::new(),
            drf_multipliers,
            unfeasible_scheduling_keys: BTreeSet::new(),
        }
    }

    pub fn add_queue(&mut self, queue: &str, weight: f64) {
        self.queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueSchedulingContext::new(queue.to_string(), weight, self.factory.zero()));
    }

    pub fn drf_cost(&self, queue: &str) -> f64 {
        match self.queues.get(queue) {
            Some(q) => drf_cost(&q.total_allocated(), &self.total_resources, &self.drf_multipliers),
            None => 0.0,
        }
    }

    /// DRF cost normalised by weight, used for queue ordering in the
    /// candidate meta-iterator (spec.md §4.6 step 2).
    pub fn drf_cost_per_weight(&self, queue: &str) -> f64 {
        let q = match self.queues.get(queue) {
            Some(q) => q,
            None => return 0.0,
        };
        if q.weight <= 0.0 {
            f64::INFINITY
        } else {
            self.drf_cost(queue) / q.weight
        }
    }

    pub fn adjusted_fair_shares(&self) -> fairshare::AdjustedFairShares {
        let inputs: Vec<QueueShareInput> = self
            .queues
            .values()
            .map(|q| QueueShareInput {
                queue: q.queue.clone(),
                weight: q.weight,
                constrained_demand: q
                    .constrained_demand
                    .dominant_fraction(&self.total_resources, &self.drf_multipliers),
            })
            .collect();
        compute_adjusted_fair_shares(&inputs)
    }

    pub fn record_allocation(&mut self, queue: &str, request: &ResourceList) {
        if let Some(q) = self.queues.get_mut(queue) {
            q.allocated = q.allocated.add(request);
        }
    }

    pub fn record_eviction(&mut self, queue: &str, request: &ResourceList) {
        if let Some(q) = self.queues.get_mut(queue) {
            q.evicted = q.evicted.add(request);
            q.evicted_gangs += 1;
        }
    }
}
