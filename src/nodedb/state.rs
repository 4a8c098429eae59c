use super::node::Node;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Nodes keyed by id in a `BTreeMap`, which gives "iterate in deterministic
/// node-id order" (spec.md §4.3 "Home-priority scan") for free, standing in
/// for the `(nodeTypeId, rounded resources, taints, labels)` bucket index
/// spec.md §4.3 describes — see DESIGN.md for why this crate selects by
/// filtered scan rather than maintaining an explicit bucket map.
#[derive(Debug, Clone, Default)]
pub struct NodeDbState {
    pub nodes: BTreeMap<String, Arc<Node>>,
}
