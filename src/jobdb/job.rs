//! Job/JobRun entities (spec.md §3).

use crate::resources::ResourceList;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A Kubernetes-style priority class as consumed by the scheduler
/// (spec.md §3: `priorityClassName -> PriorityClass`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriorityClass {
    pub name: String,
    /// Lower priority value schedules earlier (spec.md §3).
    pub priority: i32,
    pub preemptible: bool,
    pub away_node_types: Vec<AwayNodeType>,
}

/// A well-known node type reachable via away-priority scheduling
/// (spec.md §4.3 "Away-priority scan").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AwayNodeType {
    pub name: String,
    pub priority: i32,
    pub well_known_toleration_key: String,
    pub well_known_toleration_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Toleration {
    pub key: String,
    pub operator: String,
    pub value: String,
    pub effect: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeSelectorRequirement {
    pub key: String,
    pub operator: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NodeAffinity {
    pub match_expressions: Vec<NodeSelectorRequirement>,
    pub match_fields: Vec<NodeSelectorRequirement>,
}

/// A pod anti-affinity entry against a specific node, synthesised when a
/// lease-returned-and-attempted run is requeued (spec.md §4.6 step 3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeAntiAffinity {
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PodRequirements {
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
    pub resource_requests: BTreeMap<String, i64>,
    /// Resource *limits* do not participate in the scheduling key
    /// (spec.md §3).
    pub resource_limits: BTreeMap<String, i64>,
    pub affinity: NodeAffinity,
    pub node_anti_affinities: Vec<NodeAntiAffinity>,
    pub annotations: BTreeMap<String, String>,
}

/// Per-cycle scheduling metadata. `version` increments whenever an
/// antiaffinity is appended on re-queue (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulingInfo {
    pub version: u32,
    pub priority_class_name: String,
    /// Preserved alongside the original class for away-scheduling
    /// classification ambiguity (spec.md §9 Open Questions).
    pub priority_class_name_override: Option<String>,
    pub pod_requirements: PodRequirements,
}

/// Gang membership (spec.md §3, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GangInfo {
    pub gang_id: String,
    pub cardinality: usize,
    pub node_uniformity_label: Option<String>,
}

impl GangInfo {
    pub fn is_gang(&self) -> bool {
        self.cardinality > 1
    }

    pub fn singleton(job_id: &str) -> Self {
        Self {
            gang_id: job_id.to_string(),
            cardinality: 1,
            node_uniformity_label: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SchedulingMethod {
    Home,
    Away,
}

/// A single attempt at running a job on a node (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRun {
    pub run_id: String,
    pub job_id: String,
    pub executor: String,
    pub node_id: String,
    pub node_name: String,
    pub pool: String,
    pub created_at: i64,
    pub scheduled_at_priority: i32,
    pub scheduling_method: SchedulingMethod,
    pub running: bool,
    pub succeeded: bool,
    pub failed: bool,
    pub returned: bool,
    pub cancelled: bool,
    pub attempted: bool,
    pub preempt_requested: bool,
    pub pending: bool,
}

impl JobRun {
    pub fn terminal(&self) -> bool {
        self.succeeded || self.failed || self.cancelled
    }
}

/// A job, identified by a lexicographically sortable `job_id`
/// (spec.md §3). Mutated only by constructing a new `Job` value — never
/// alias-mutated — per the ownership rules in spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub job_id: String,
    pub queue: String,
    pub job_set: String,
    /// Lower priority value schedules earlier (spec.md §3).
    pub priority: i32,
    pub submitted_time: i64,
    pub priority_class_name: String,
    pub scheduling_info: SchedulingInfo,
    pub gang_info: GangInfo,
    pub queued: bool,
    pub queued_version: u32,
    pub cancel_requested: bool,
    pub cancel_by_job_set_requested: bool,
    pub cancelled: bool,
    pub failed: bool,
    pub succeeded: bool,
    pub validated: bool,
    pub runs: Vec<JobRun>,
    /// Per-pool bid prices (spec.md §3, §6).
    pub bid_prices: BTreeMap<String, crate::cycle::interfaces::BidPrice>,
    pub pools: Vec<String>,
    pub fail_fast: bool,
    pub max_retries_seen: u32,
}

impl Job {
    pub fn latest_run(&self) -> Option<&JobRun> {
        self.runs.last()
    }

    pub fn has_active_run(&self) -> bool {
        self.runs.iter().any(|r| !r.terminal())
    }

    pub fn terminal(&self) -> bool {
        self.cancelled || self.failed || self.succeeded
    }

    /// Exactly one of {queued, active run, terminal} holds (spec.md §3, §8).
    pub fn invariant_holds(&self) -> bool {
        let states = [self.queued, self.has_active_run(), self.terminal()];
        states.iter().filter(|s| **s).count() == 1
    }

    /// A terminal job's runs are all terminal (spec.md §3, §8).
    pub fn terminal_runs_are_terminal(&self) -> bool {
        !self.terminal() || self.runs.iter().all(|r| r.terminal())
    }

    /// Content hash over (priorityClass, nodeSelector, sorted tolerations,
    /// non-zero requests, affinity). Annotations, resource limits, and
    /// zero-valued requests do not affect the key (spec.md §3, §8).
    pub fn scheduling_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.priority_class_name.as_bytes());

        for (k, v) in &self.scheduling_info.pod_requirements.node_selector {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b";");
        }

        let mut tolerations = self.scheduling_info.pod_requirements.tolerations.clone();
        tolerations.sort();
        for t in &tolerations {
            hasher.update(t.key.as_bytes());
            hasher.update(t.operator.as_bytes());
            hasher.update(t.value.as_bytes());
            hasher.update(t.effect.as_bytes());
        }

        for (name, qty) in &self.scheduling_info.pod_requirements.resource_requests {
            if *qty != 0 {
                hasher.update(name.as_bytes());
                hasher.update(qty.to_le_bytes());
            }
        }

        for req in &self.scheduling_info.pod_requirements.affinity.match_expressions {
            hasher.update(req.key.as_bytes());
            hasher.update(req.operator.as_bytes());
            for v in &req.values {
                hasher.update(v.as_bytes());
            }
        }
        for req in &self.scheduling_info.pod_requirements.affinity.match_fields {
            hasher.update(req.key.as_bytes());
            hasher.update(req.operator.as_bytes());
            for v in &req.values {
                hasher.update(v.as_bytes());
            }
        }

        hex::encode(hasher.finalize())
    }

    pub fn requests(&self, factory: &crate::resources::ResourceListFactory) -> ResourceList {
        factory.from_request_map(&self.scheduling_info.pod_requirements.resource_requests)
    }
}
