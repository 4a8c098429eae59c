//! Gang-atomic placement on top of [`crate::nodedb::NodeDb`] (spec.md §4.5).

pub mod rate_limiter;

use crate::context::SchedulingContext;
use crate::error::{GangSchedulingError, NodeDbError};
use crate::nodedb::{self, JobSchedulingRequest, SelectedNode};
use crate::resources::ResourceList;
use std::collections::BTreeMap;

/// One member of a gang offered to the scheduler together (spec.md §4.5,
/// §4.6 step 2: "a lazy sequence of gang scheduling contexts ... grouped by
/// gangId").
pub struct GangMember<'a> {
    pub job_id: &'a str,
    pub request: JobSchedulingRequest<'a>,
    pub resource_request: ResourceList,
}

pub struct Gang<'a> {
    pub queue: &'a str,
    pub priority_class_name: &'a str,
    pub scheduling_key: &'a str,
    pub members: Vec<GangMember<'a>>,
}

impl<'a> Gang<'a> {
    pub fn cardinality(&self) -> usize {
        self.members.len()
    }

    pub fn total_request(&self, factory: &crate::resources::ResourceListFactory) -> ResourceList {
        self.members
            .iter()
            .fold(factory.zero(), |acc, m| acc.add(&m.resource_request))
    }
}

/// The five enforcement points of spec.md §4.5, applied per-gang within a
/// single pool's scheduling round. One instance is built per round and
/// discarded at the end of it — all of its counters are round-scoped except
/// the `unfeasible_scheduling_keys` memo it shares with [`SchedulingContext`].
pub struct GangScheduler {
    factory: crate::resources::ResourceListFactory,
    total_resources: ResourceList,
    maximum_scheduling_burst: usize,
    maximum_resource_fraction_to_schedule: BTreeMap<String, f64>,
    maximum_per_queue_resource_fraction: BTreeMap<String, f64>,
    floating_resources: ResourceList,
    scheduled_this_round: ResourceList,
    scheduled_by_queue_and_priority_class: BTreeMap<(String, String), ResourceList>,
}

impl GangScheduler {
    pub fn new(
        factory: crate::resources::ResourceListFactory,
        total_resources: ResourceList,
        maximum_scheduling_burst: usize,
        maximum_resource_fraction_to_schedule: BTreeMap<String, f64>,
        maximum_per_queue_resource_fraction: BTreeMap<String, f64>,
        floating_resources: ResourceList,
    ) -> Self {
        let scheduled_this_round = factory.zero();
        Self {
            factory,
            total_resources,
            maximum_scheduling_burst,
            maximum_resource_fraction_to_schedule,
            maximum_per_queue_resource_fraction,
            floating_resources,
            scheduled_this_round,
            scheduled_by_queue_and_priority_class: BTreeMap::new(),
        }
    }

    /// Attempts to place `gang` atomically. On success, binds every member
    /// via `txn` and updates this round's counters and `ctx`'s per-queue
    /// allocation. On failure, rolls back any partial bind (handled inside
    /// [`nodedb::NodeDb::schedule_many_with_txn`]) and leaves all counters
    /// untouched.
    pub fn try_schedule(
        &mut self,
        txn: &mut nodedb::WriteTxn<'_>,
        ctx: &mut SchedulingContext,
        gang: &Gang<'_>,
    ) -> Result<Vec<SelectedNode>, GangSchedulingError> {
        // 5. Scheduling-key memo: fail immediately without touching NodeDb.
        if ctx.unfeasible_scheduling_keys.contains(gang.scheduling_key) {
            return Err(GangSchedulingError::MemoizedUnfeasible);
        }

        // 1. Global burst limit: a cardinality this large is unfeasible in
        // any round, so memoize it.
        if gang.cardinality() > self.maximum_scheduling_burst {
            ctx.unfeasible_scheduling_keys.insert(gang.scheduling_key.to_string());
            return Err(GangSchedulingError::ExceedsMaximumBurst {
                cardinality: gang.cardinality(),
                max: self.maximum_scheduling_burst,
            });
        }

        let total_request = gang.total_request(&self.factory);

        // 2. Per-round global resource-fraction caps. Round-scoped: the key
        // is not memoized, since a later round with more headroom may admit
        // the same gang.
        let projected_total = self.scheduled_this_round.add(&total_request);
        for (resource, fraction) in &self.maximum_resource_fraction_to_schedule {
            let cap = (self.total_resources.get(resource) as f64 * fraction) as i64;
            if projected_total.get(resource) > cap {
                return Err(GangSchedulingError::ExceedsResourceFractionCap {
                    resource: resource.clone(),
                });
            }
        }

        // 3. Per-queue caps by priority class. Also round-scoped.
        let queue_key = (gang.queue.to_string(), gang.priority_class_name.to_string());
        let queue_scheduled = self
            .scheduled_by_queue_and_priority_class
            .get(&queue_key)
            .cloned()
            .unwrap_or_else(|| self.factory.zero());
        let queue_projected = queue_scheduled.add(&total_request);
        if let Some(fraction) = self.maximum_per_queue_resource_fraction.get(gang.priority_class_name) {
            for name in self.factory.names() {
                let cap = (self.total_resources.get(name) as f64 * fraction) as i64;
                if queue_projected.get(name) > cap {
                    return Err(GangSchedulingError::ExceedsQueueCap {
                        queue: gang.queue.to_string(),
                        priority_class: gang.priority_class_name.to_string(),
                    });
                }
            }
        }

        // 4. Floating resources, subtracted atomically with the gang and
        // rolled back on failure.
        let projected_floating = self.floating_resources.subtract(&total_request);
        if projected_floating.has_negative() {
            return Err(GangSchedulingError::NodeDb(NodeDbError::Unschedulable));
        }

        let members: Vec<nodedb::GangMember<'_>> = gang
            .members
            .iter()
            .map(|m| nodedb::GangMember {
                request: JobSchedulingRequest {
                    job_id: m.request.job_id,
                    queue: m.request.queue,
                    home_priority: m.request.home_priority,
                    pod_requirements: m.request.pod_requirements,
                    away_node_types: if gang.cardinality() > 1 { &[] } else { m.request.away_node_types },
                    target_node_id: m.request.target_node_id,
                    is_gang: gang.cardinality() > 1,
                },
                resource_request: m.resource_request.clone(),
                queue: gang.queue,
            })
            .collect();

        match nodedb::NodeDb::schedule_many_with_txn(txn, &members) {
            Ok(selected) => {
                self.scheduled_this_round = projected_total;
                self.scheduled_by_queue_and_priority_class.insert(queue_key, queue_projected);
                self.floating_resources = projected_floating;
                ctx.record_allocation(gang.queue, &total_request);
                Ok(selected)
            }
            Err(failure) => {
                // A failure reason present on every node (no node anywhere has
                // the requested resource type) is globally unfeasible; a
                // partial/queue-constrained failure is round-scoped only.
                if failure.excluded_by_reason.keys().any(|r| r.starts_with("insufficient:")) {
                    ctx.unfeasible_scheduling_keys.insert(gang.scheduling_key.to_string());
                }
                Err(GangSchedulingError::NodeDb(NodeDbError::Unschedulable))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobdb::job::PodRequirements;
    use crate::resources::ResourceListFactory;
    use std::collections::BTreeMap as Map;

    fn factory() -> ResourceListFactory {
        ResourceListFactory::new(vec![("cpu".into(), 1)]).unwrap()
    }

    fn node(id: &str, cpu: i64, f: &ResourceListFactory) -> crate::nodedb::Node {
        crate::nodedb::Node::new(
            id.into(),
            "type-a".into(),
            0,
            "exec-1".into(),
            id.into(),
            vec![],
            Map::new(),
            f.from_pairs(&[("cpu", cpu)]).unwrap(),
            &[0],
        )
    }

    #[test]
    fn burst_limit_memoizes_unfeasibility() {
        let f = factory();
        let total = f.from_pairs(&[("cpu", 10)]).unwrap();
        let mut ctx = SchedulingContext::new("pool-a".into(), f.clone(), total.clone(), vec![1.0]);
        ctx.add_queue("q1", 1.0);
        let mut gs = GangScheduler::new(f.clone(), total, 1, Map::new(), Map::new(), f.zero());

        let db = crate::nodedb::NodeDb::new(f.clone());
        db.upsert(vec![node("n1", 10, &f)]).unwrap();
        let mut txn = db.write_txn();

        let mut pod = PodRequirements::default();
        pod.resource_requests.insert("cpu".into(), 1);
        let req1 = JobSchedulingRequest {
            job_id: "j1",
            queue: "q1",
            home_priority: 0,
            pod_requirements: &pod,
            away_node_types: &[],
            target_node_id: None,
            is_gang: true,
        };
        let req2 = JobSchedulingRequest {
            job_id: "j2",
            queue: "q1",
            home_priority: 0,
            pod_requirements: &pod,
            away_node_types: &[],
            target_node_id: None,
            is_gang: true,
        };
        let gang = Gang {
            queue: "q1",
            priority_class_name: "pc0",
            scheduling_key: "key-a",
            members: vec![
                GangMember {
                    job_id: "j1",
                    request: req1,
                    resource_request: f.from_pairs(&[("cpu", 1)]).unwrap(),
                },
                GangMember {
                    job_id: "j2",
                    request: req2,
                    resource_request: f.from_pairs(&[("cpu", 1)]).unwrap(),
                },
            ],
        };

        let err = gs.try_schedule(&mut txn, &mut ctx, &gang).unwrap_err();
        assert!(matches!(err, GangSchedulingError::ExceedsMaximumBurst { .. }));
        assert!(ctx.unfeasible_scheduling_keys.contains("key-a"));
    }

    #[test]
    fn resource_fraction_cap_is_round_scoped_not_memoized() {
        let f = factory();
        let total = f.from_pairs(&[("cpu", 10)]).unwrap();
        let mut ctx = SchedulingContext::new("pool-a".into(), f.clone(), total.clone(), vec![1.0]);
        ctx.add_queue("q1", 1.0);
        let mut caps = Map::new();
        caps.insert("cpu".to_string(), 0.5);
        let mut gs = GangScheduler::new(f.clone(), total, 10, caps, Map::new(), f.zero());

        let db = crate::nodedb::NodeDb::new(f.clone());
        db.upsert(vec![node("n1", 10, &f)]).unwrap();
        let mut txn = db.write_txn();

        let mut pod = PodRequirements::default();
        pod.resource_requests.insert("cpu".into(), 6);
        let req = JobSchedulingRequest {
            job_id: "j1",
            queue: "q1",
            home_priority: 0,
            pod_requirements: &pod,
            away_node_types: &[],
            target_node_id: None,
            is_gang: false,
        };
        let gang = Gang {
            queue: "q1",
            priority_class_name: "pc0",
            scheduling_key: "key-b",
            members: vec![GangMember {
                job_id: "j1",
                request: req,
                resource_request: f.from_pairs(&[("cpu", 6)]).unwrap(),
            }],
        };

        let err = gs.try_schedule(&mut txn, &mut ctx, &gang).unwrap_err();
        assert!(matches!(err, GangSchedulingError::ExceedsResourceFractionCap { .. }));
        assert!(!ctx.unfeasible_scheduling_keys.contains("key-b"));
    }
}
