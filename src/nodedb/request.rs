use crate::jobdb::job::{AwayNodeType, PodRequirements, Toleration};

/// What [`super::NodeDb::select_node_for_job`] needs to know about a job to
/// pick a node (spec.md §4.3). Built by the caller (the gang scheduler) from
/// a [`crate::jobdb::job::Job`] plus its resolved priority class.
pub struct JobSchedulingRequest<'a> {
    pub job_id: &'a str,
    pub queue: &'a str,
    pub home_priority: i32,
    pub pod_requirements: &'a PodRequirements,
    pub away_node_types: &'a [AwayNodeType],
    /// A resumed run's previous node id — the targeted fast path
    /// (spec.md §4.3 step 1).
    pub target_node_id: Option<&'a str>,
    /// A gang job is never placed via away-priority scanning
    /// (spec.md §4.3 step 3, §9).
    pub is_gang: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedNode {
    pub node_id: String,
    pub scheduled_at_priority: i32,
    pub method: crate::jobdb::job::SchedulingMethod,
    /// Tolerations added automatically for the matching away node type,
    /// to be attached on lease emit (spec.md §4.3 step 3).
    pub additional_tolerations: Vec<Toleration>,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionFailure {
    /// Aggregate "number excluded by reason" map (spec.md §4.5).
    pub excluded_by_reason: std::collections::BTreeMap<String, u32>,
}

impl SelectionFailure {
    pub fn record(&mut self, reason: &super::fit::UnfitReason) {
        let key = match reason {
            super::fit::UnfitReason::UntoleratedTaint(t) => format!("untolerated-taint:{t}"),
            super::fit::UnfitReason::AffinityNotSatisfied => "affinity".to_string(),
            super::fit::UnfitReason::NodeSelectorNotSatisfied => "node-selector".to_string(),
            super::fit::UnfitReason::InsufficientResource(r) => format!("insufficient:{r}"),
        };
        *self.excluded_by_reason.entry(key).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: SelectionFailure) {
        for (k, v) in other.excluded_by_reason {
            *self.excluded_by_reason.entry(k).or_insert(0) += v;
        }
    }
}
