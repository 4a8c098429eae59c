//! `FairShareOrder` (spec.md §4.2): `(priority ASC, submittedTime ASC, jobId ASC)`,
//! with an optional `preferLargeJobs` inversion by dominant resource size
//! before submittedTime (spec.md §4.2, §9 "pool-scoped toggle").

use crate::jobdb::job::Job;
use crate::resources::ResourceListFactory;
use std::cmp::Ordering;

/// A total, deterministic ordering key for queued jobs. Two jobs with equal
/// priority retain submission order, so gang members at the same priority
/// stay contiguous (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub priority: i32,
    /// Negated dominant-resource-size rank when `prefer_large_jobs` is set,
    /// so that larger jobs sort first without disturbing the
    /// `submitted_time` tie-break for equal-size jobs.
    pub large_job_rank: Option<i64>,
    pub submitted_time: i64,
    pub job_id: String,
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| match (self.large_job_rank, other.large_job_rank) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => Ordering::Equal,
            })
            .then_with(|| self.submitted_time.cmp(&other.submitted_time))
            .then_with(|| self.job_id.cmp(&other.job_id))
    }
}

pub fn order_key(job: &Job, factory: &ResourceListFactory, prefer_large_jobs: bool) -> OrderKey {
    let large_job_rank = if prefer_large_jobs {
        let requests = job.requests(factory);
        // Larger jobs should sort earlier: negate a monotone size proxy
        // (sum of quantities) so ascending order puts them first.
        Some(-requests.as_slice().iter().sum::<i64>())
    } else {
        None
    };
    OrderKey {
        priority: job.priority,
        large_job_rank,
        submitted_time: job.submitted_time,
        job_id: job.job_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(priority: i32, submitted: i64, id: &str) -> OrderKey {
        OrderKey {
            priority,
            large_job_rank: None,
            submitted_time: submitted,
            job_id: id.to_string(),
        }
    }

    #[test]
    fn orders_by_priority_then_submission_then_id() {
        let mut keys = vec![key(5, 100, "b"), key(1, 200, "a"), key(1, 100, "z"), key(1, 100, "a")];
        keys.sort();
        assert_eq!(
            keys.iter().map(|k| k.job_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "z", "a", "b"]
        );
    }
}
