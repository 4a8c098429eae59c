use super::fit;
use super::node::Node;
use super::request::{JobSchedulingRequest, SelectedNode, SelectionFailure};
use super::state::NodeDbState;
use crate::error::NodeDbError;
use crate::jobdb::job::SchedulingMethod;
use crate::resources::{ResourceList, ResourceListFactory, EVICTED_PRIORITY};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;

pub(crate) struct Shared {
    pub(crate) committed: ArcSwap<NodeDbState>,
    pub(crate) write_lock: Mutex<()>,
    pub(crate) factory: ResourceListFactory,
}

pub struct ReadTxn {
    pub(crate) snapshot: Arc<NodeDbState>,
}

impl ReadTxn {
    pub fn get_node(&self, id: &str) -> Option<Arc<Node>> {
        self.snapshot.nodes.get(id).cloned()
    }

    pub fn get_nodes(&self) -> Vec<Arc<Node>> {
        self.snapshot.nodes.values().cloned().collect()
    }
}

pub struct WriteTxn<'a> {
    shared: &'a Shared,
    working: NodeDbState,
    _guard: parking_lot::MutexGuard<'a, ()>,
    closed: bool,
}

impl<'a> WriteTxn<'a> {
    pub(crate) fn new(shared: &'a Shared, guard: parking_lot::MutexGuard<'a, ()>) -> Self {
        let working = (**shared.committed.load()).clone();
        Self {
            shared,
            working,
            _guard: guard,
            closed: false,
        }
    }

    fn check_open(&self) -> Result<(), NodeDbError> {
        if self.closed {
            Err(NodeDbError::TxnClosed)
        } else {
            Ok(())
        }
    }

    pub fn upsert(&mut self, nodes: Vec<Node>) -> Result<(), NodeDbError> {
        self.check_open()?;
        for node in nodes {
            self.working.nodes.insert(node.id.clone(), Arc::new(node));
        }
        Ok(())
    }

    pub fn get_node(&self, id: &str) -> Result<Option<Arc<Node>>, NodeDbError> {
        self.check_open()?;
        Ok(self.working.nodes.get(id).cloned())
    }

    pub fn get_nodes(&self) -> Result<Vec<Arc<Node>>, NodeDbError> {
        self.check_open()?;
        Ok(self.working.nodes.values().cloned().collect())
    }

    /// `selectNodeForJob` (spec.md §4.3): targeted fast path, then a
    /// home-priority scan, then (for non-gang jobs with away node types) an
    /// away-priority scan.
    pub fn select_node_for_job(&self, req: &JobSchedulingRequest<'_>) -> Result<SelectedNode, SelectionFailure> {
        self.check_open().map_err(|_| SelectionFailure::default())?;

        if let Some(target) = req.target_node_id {
            if let Some(node) = self.working.nodes.get(target) {
                if fit::fits(node, req.pod_requirements, req.home_priority, &self.shared.factory).is_ok() {
                    return Ok(SelectedNode {
                        node_id: node.id.clone(),
                        scheduled_at_priority: req.home_priority,
                        method: SchedulingMethod::Home,
                        additional_tolerations: vec![],
                    });
                }
            }
        }

        let mut failure = SelectionFailure::default();
        for node in self.working.nodes.values() {
            match fit::fits(node, req.pod_requirements, req.home_priority, &self.shared.factory) {
                Ok(()) => {
                    return Ok(SelectedNode {
                        node_id: node.id.clone(),
                        scheduled_at_priority: req.home_priority,
                        method: SchedulingMethod::Home,
                        additional_tolerations: vec![],
                    })
                }
                Err(reason) => failure.record(&reason),
            }
        }

        if !req.is_gang {
            for away in req.away_node_types {
                let mut pod = req.pod_requirements.clone();
                pod.tolerations.push(crate::jobdb::job::Toleration {
                    key: away.well_known_toleration_key.clone(),
                    operator: "Equal".to_string(),
                    value: away.well_known_toleration_value.clone(),
                    effect: "NoSchedule".to_string(),
                });
                for node in self.working.nodes.values() {
                    if fit::fits(node, &pod, away.priority, &self.shared.factory).is_ok() {
                        return Ok(SelectedNode {
                            node_id: node.id.clone(),
                            scheduled_at_priority: away.priority,
                            method: SchedulingMethod::Away,
                            additional_tolerations: vec![crate::jobdb::job::Toleration {
                                key: away.well_known_toleration_key.clone(),
                                operator: "Equal".to_string(),
                                value: away.well_known_toleration_value.clone(),
                                effect: "NoSchedule".to_string(),
                            }],
                        });
                    }
                }
            }
        }

        Err(failure)
    }

    /// `bindJobToNode` (spec.md §4.3). Fails `AlreadyBound` if the job is
    /// already present on the node.
    pub fn bind_job_to_node(
        &mut self,
        node_id: &str,
        job_id: &str,
        queue: &str,
        request: &ResourceList,
        priority: i32,
    ) -> Result<(), NodeDbError> {
        self.check_open()?;
        let mut node = (**self
            .working
            .nodes
            .get(node_id)
            .ok_or_else(|| NodeDbError::NodeNotFound(node_id.to_string()))?)
        .clone();
        if node.allocated_by_job_id.contains_key(job_id) {
            return Err(NodeDbError::AlreadyBound {
                job_id: job_id.to_string(),
                node_id: node_id.to_string(),
            });
        }
        node.allocated_by_job_id.insert(job_id.to_string(), request.clone());
        node.allocated_at_priority.insert(job_id.to_string(), priority);
        let entry = node
            .allocated_by_queue
            .entry(queue.to_string())
            .or_insert_with(|| self.shared.factory.zero());
        *entry = entry.add(request);
        node.mark_allocated(priority, request);
        self.working.nodes.insert(node_id.to_string(), Arc::new(node));
        Ok(())
    }

    /// `evictJobsFromNode` (spec.md §4.3): moves each job's allocation to
    /// the evicted-priority bucket and records its run id, so the
    /// allocation stays reserved in-place for a possible reschedule.
    pub fn evict_jobs_from_node(
        &mut self,
        node_id: &str,
        jobs: &[(String, String, String)], // (job_id, run_id, queue)
    ) -> Result<(), NodeDbError> {
        self.check_open()?;
        let mut node = (**self
            .working
            .nodes
            .get(node_id)
            .ok_or_else(|| NodeDbError::NodeNotFound(node_id.to_string()))?)
        .clone();
        for (job_id, run_id, _queue) in jobs {
            let request = node
                .allocated_by_job_id
                .get(job_id)
                .cloned()
                .ok_or_else(|| NodeDbError::NotBound {
                    job_id: job_id.clone(),
                    node_id: node_id.to_string(),
                })?;
            let bound_priority = node
                .allocated_at_priority
                .get(job_id)
                .copied()
                .unwrap_or(i32::MAX);
            // Release exactly the buckets `bind` debited, then re-reserve
            // the same amount at the evicted bucket only, so the job's
            // resources stay in-place and reservable for a reschedule this
            // round (spec.md §4.3, GLOSSARY "Eviction").
            node.mark_allocatable(bound_priority, &request);
            let evicted = node
                .allocatable_by_priority
                .get_mut(&EVICTED_PRIORITY)
                .expect("evicted bucket always present");
            *evicted = evicted.subtract(&request);
            node.evicted_job_run_ids.insert(run_id.clone());
            node.evicted_jobs.insert(job_id.clone());
        }
        self.working.nodes.insert(node_id.to_string(), Arc::new(node));
        Ok(())
    }

    /// `unbindJobFromNode` (spec.md §4.3): removes the allocation entirely,
    /// restoring `allocatableByPriority` at all priorities. Works whether or
    /// not the job was previously evicted, so `evict` then `unbind` equals
    /// `unbind` directly (spec.md §4.3, §8).
    pub fn unbind_job_from_node(&mut self, node_id: &str, job_id: &str, queue: &str) -> Result<(), NodeDbError> {
        self.check_open()?;
        let mut node = (**self
            .working
            .nodes
            .get(node_id)
            .ok_or_else(|| NodeDbError::NodeNotFound(node_id.to_string()))?)
        .clone();
        let request = node
            .allocated_by_job_id
            .remove(job_id)
            .ok_or_else(|| NodeDbError::NotBound {
                job_id: job_id.to_string(),
                node_id: node_id.to_string(),
            })?;
        let bound_priority = node
            .allocated_at_priority
            .remove(job_id)
            .unwrap_or(i32::MAX);
        if let Some(q) = node.allocated_by_queue.get_mut(queue) {
            *q = q.subtract(&request);
        }
        // `evict` then `unbind` must equal `unbind` directly (spec.md §8):
        // whether the allocation currently sits at its original priority or
        // was moved to the evicted bucket, unbind restores it to exactly
        // the buckets it is currently debited from.
        if node.evicted_jobs.remove(job_id) {
            let evicted = node
                .allocatable_by_priority
                .get_mut(&EVICTED_PRIORITY)
                .expect("evicted bucket always present");
            *evicted = evicted.add(&request);
        } else {
            node.mark_allocatable(bound_priority, &request);
        }
        self.working.nodes.insert(node_id.to_string(), Arc::new(node));
        Ok(())
    }

    pub fn working_state(&self) -> &NodeDbState {
        &self.working
    }

    pub fn commit(mut self) -> Result<(), NodeDbError> {
        self.check_open()?;
        let working = std::mem::take(&mut self.working);
        self.shared.committed.store(Arc::new(working));
        self.closed = true;
        Ok(())
    }

    pub fn abort(mut self) {
        self.closed = true;
    }
}

impl<'a> Drop for WriteTxn<'a> {
    fn drop(&mut self) {
        self.closed = true;
    }
}
