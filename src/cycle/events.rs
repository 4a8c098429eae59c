//! Closed event taxonomy published at the end of a cycle (spec.md §4.6 step 6,
//! §6 "Emitted event kinds (wire-compatibility critical)").

use crate::error::JobErrorReason;
use crate::jobdb::job::SchedulingInfo;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum Event {
    JobRunLeased {
        run_id: String,
        job_id: String,
        executor_id: String,
        node_id: String,
        scheduled_at_priority: i32,
        pool: String,
        pod_requirements_overlay: Option<String>,
    },
    JobRunPreempted {
        preempted_run_id: String,
        preempted_job_id: String,
    },
    JobRunErrors {
        run_id: String,
        job_id: String,
        errors: Vec<JobErrorReason>,
    },
    JobErrors {
        job_id: String,
        errors: Vec<JobErrorReason>,
    },
    JobRunCancelled {
        run_id: String,
        job_id: String,
    },
    CancelledJob {
        job_id: String,
    },
    CancelJob {
        job_id: String,
    },
    ReprioritisedJob {
        job_id: String,
        priority: i32,
    },
    JobSucceeded {
        job_id: String,
    },
    JobRequeued {
        job_id: String,
        scheduling_info: SchedulingInfo,
    },
    JobValidated {
        job_id: String,
    },
}

/// Events for a single `(queue, jobSet)`, in emission order. The publisher
/// must preserve order within a sequence; no ordering is guaranteed across
/// sequences (spec.md §5 "Ordering").
#[derive(Debug, Clone, Default)]
pub struct QueuedEventSequence {
    pub queue: String,
    pub job_set: String,
    pub events: Vec<Event>,
}

/// Groups a flat event list into one sequence per `(queue, jobSet)`,
/// preserving each group's relative emission order (spec.md §4.6 step 6).
pub fn group_by_queue_and_job_set(events: Vec<(String, String, Event)>) -> Vec<QueuedEventSequence> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut sequences: std::collections::BTreeMap<(String, String), QueuedEventSequence> = std::collections::BTreeMap::new();
    for (queue, job_set, event) in events {
        let key = (queue.clone(), job_set.clone());
        sequences
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key.clone());
                QueuedEventSequence {
                    queue: queue.clone(),
                    job_set: job_set.clone(),
                    events: Vec::new(),
                }
            })
            .events
            .push(event);
    }
    order.into_iter().filter_map(|k| sequences.remove(&k)).collect()
}
