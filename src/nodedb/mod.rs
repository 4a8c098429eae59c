//! Transactional indexed store of cluster nodes (spec.md §4.3).

pub mod fit;
pub mod node;
pub mod request;
mod state;
mod txn;

pub use node::Node;
pub use request::{JobSchedulingRequest, SelectedNode, SelectionFailure};
pub use txn::{ReadTxn, WriteTxn};

use crate::error::NodeDbError;
use crate::resources::ResourceListFactory;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use state::NodeDbState;

/// Process-wide node catalog singleton (spec.md §5 "Shared resources").
pub struct NodeDb {
    shared: txn::Shared,
}

/// One gang member's placement request plus the resource request to bind,
/// passed to [`NodeDb::schedule_many_with_txn`].
pub struct GangMember<'a> {
    pub request: JobSchedulingRequest<'a>,
    pub resource_request: crate::resources::ResourceList,
    pub queue: &'a str,
}

impl NodeDb {
    pub fn new(factory: ResourceListFactory) -> Self {
        Self {
            shared: txn::Shared {
                committed: ArcSwap::from_pointee(NodeDbState::default()),
                write_lock: Mutex::new(()),
                factory,
            },
        }
    }

    pub fn write_txn(&self) -> WriteTxn<'_> {
        let guard = self.shared.write_lock.lock();
        WriteTxn::new(&self.shared, guard)
    }

    pub fn read_txn(&self) -> ReadTxn {
        ReadTxn {
            snapshot: self.shared.committed.load_full(),
        }
    }

    pub fn get_node(&self, id: &str) -> Option<std::sync::Arc<Node>> {
        self.read_txn().get_node(id)
    }

    pub fn get_nodes(&self) -> Vec<std::sync::Arc<Node>> {
        self.read_txn().get_nodes()
    }

    pub fn upsert(&self, nodes: Vec<Node>) -> Result<(), NodeDbError> {
        let mut txn = self.write_txn();
        txn.upsert(nodes)?;
        txn.commit()
    }

    /// Attempts to place every member of a gang within `txn`; on any
    /// failure, rolls back every bind performed so far for this gang call
    /// and returns `false` (spec.md §4.3). Does not commit or abort `txn`
    /// itself — the caller (the gang scheduler) decides the fate of the
    /// whole round's transaction.
    pub fn schedule_many_with_txn(
        txn: &mut WriteTxn<'_>,
        members: &[GangMember<'_>],
    ) -> Result<Vec<SelectedNode>, SelectionFailure> {
        let mut placements = Vec::with_capacity(members.len());
        for member in members {
            match txn.select_node_for_job(&member.request) {
                Ok(selected) => {
                    if let Err(e) = txn.bind_job_to_node(
                        &selected.node_id,
                        member.request.job_id,
                        member.queue,
                        &member.resource_request,
                        selected.scheduled_at_priority,
                    ) {
                        // Roll back everything placed so far in this gang.
                        for (placed, placed_member) in placements.iter().zip(members.iter()) {
                            let _: Result<(), _> =
                                txn.unbind_job_from_node(&placement_node_id(placed), placed_member.request.job_id, placed_member.queue);
                        }
                        let mut failure = SelectionFailure::default();
                        failure.excluded_by_reason.insert(format!("bind-error:{e}"), 1);
                        return Err(failure);
                    }
                    placements.push(selected);
                }
                Err(mut failure) => {
                    for (placed, placed_member) in placements.iter().zip(members.iter()) {
                        let _: Result<(), _> =
                            txn.unbind_job_from_node(&placement_node_id(placed), placed_member.request.job_id, placed_member.queue);
                    }
                    failure.excluded_by_reason.insert("gang-partial-failure".to_string(), 1);
                    return Err(failure);
                }
            }
        }
        Ok(placements)
    }
}

fn placement_node_id(selected: &SelectedNode) -> String {
    selected.node_id.clone()
}
