//! Node entity and allocatable-by-priority bookkeeping (spec.md §3).

use crate::jobdb::job::Taint;
use crate::resources::{ResourceList, EVICTED_PRIORITY};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub node_type_id: String,
    pub index: u64,
    pub executor: String,
    pub name: String,
    pub taints: Vec<Taint>,
    pub labels: BTreeMap<String, String>,
    pub total_resources: ResourceList,
    /// `allocatableByPriority[p]` is the resource free for a *new* workload
    /// at priority `p` (spec.md §3). The [`EVICTED_PRIORITY`] entry holds
    /// the pool available only to recently-evicted workloads.
    pub allocatable_by_priority: BTreeMap<i32, ResourceList>,
    pub allocated_by_queue: BTreeMap<String, ResourceList>,
    pub allocated_by_job_id: BTreeMap<String, ResourceList>,
    pub evicted_job_run_ids: BTreeSet<String>,
    /// The priority each bound job was allocated at, so `unbind` can credit
    /// back exactly the buckets `bind`/`evict` debited (not a spec.md §3
    /// field; an implementation necessity for the bind/evict/unbind
    /// identities in spec.md §4.3/§8).
    pub(crate) allocated_at_priority: BTreeMap<String, i32>,
    /// Job ids whose allocation currently sits in the evicted bucket rather
    /// than at `allocated_at_priority[job_id]`.
    pub(crate) evicted_jobs: BTreeSet<String>,
}

impl Node {
    /// Builds a fresh node with no allocations: `allocatableByPriority[p] ==
    /// totalResources` for every indexed priority plus the evicted bucket
    /// (spec.md §3; grounded on
    /// `NewAllocatableByPriorityAndResourceType` in
    /// `examples/original_source/internal/scheduler/internaltypes/resource_list_map_util.go`).
    pub fn new(
        id: String,
        node_type_id: String,
        index: u64,
        executor: String,
        name: String,
        taints: Vec<Taint>,
        labels: BTreeMap<String, String>,
        total_resources: ResourceList,
        indexed_priorities: &[i32],
    ) -> Self {
        let mut allocatable_by_priority = BTreeMap::new();
        for p in indexed_priorities {
            allocatable_by_priority.insert(*p, total_resources.clone());
        }
        allocatable_by_priority.insert(EVICTED_PRIORITY, total_resources.clone());
        Self {
            id,
            node_type_id,
            index,
            executor,
            name,
            taints,
            labels,
            total_resources,
            allocatable_by_priority,
            allocated_by_queue: BTreeMap::new(),
            allocated_by_job_id: BTreeMap::new(),
            evicted_job_run_ids: BTreeSet::new(),
            allocated_at_priority: BTreeMap::new(),
            evicted_jobs: BTreeSet::new(),
        }
    }

    pub fn allocatable_at(&self, priority: i32) -> ResourceList {
        self.allocatable_by_priority
            .get(&priority)
            .cloned()
            .unwrap_or_else(|| self.total_resources.factory().zero())
    }

    /// `markAllocated`: resources allocated to a workload of priority `p`
    /// reduce what's allocatable to workloads of priority `<= p`
    /// (`examples/original_source/.../resource_list_map_util.go`).
    pub fn mark_allocated(&mut self, priority: i32, request: &ResourceList) {
        self.mark_allocatable(priority, &request.negate());
    }

    /// `markAllocatable`: resources released by a workload of priority `p`
    /// increase what's allocatable to workloads of priority `<= p`.
    pub fn mark_allocatable(&mut self, priority: i32, delta: &ResourceList) {
        for (p, allocatable) in self.allocatable_by_priority.iter_mut() {
            if *p <= priority {
                *allocatable = allocatable.add(delta);
            }
        }
    }

    /// For `p1 < p2`: `allocatableByPriority[p1] <= allocatableByPriority[p2]`
    /// component-wise (spec.md §3, §8).
    pub fn monotonicity_holds(&self) -> bool {
        let mut entries: Vec<_> = self.allocatable_by_priority.iter().collect();
        entries.sort_by_key(|(p, _)| **p);
        entries.windows(2).all(|w| w[0].1.le(w[1].1))
    }
}
