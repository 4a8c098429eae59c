//! The fit check (spec.md §4.3): taints/tolerations, node affinity, node
//! selector, and rounded resource comparison.

use super::node::Node;
use crate::jobdb::job::{NodeSelectorRequirement, PodRequirements};
use crate::resources::ResourceListFactory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnfitReason {
    UntoleratedTaint(String),
    AffinityNotSatisfied,
    NodeSelectorNotSatisfied,
    InsufficientResource(String),
}

fn tolerates_taint(pod: &PodRequirements, taint: &crate::jobdb::job::Taint) -> bool {
    if taint.effect != "NoSchedule" {
        return true;
    }
    pod.tolerations.iter().any(|t| {
        t.key == taint.key
            && (t.operator == "Exists" || t.value == taint.value)
            && (t.effect.is_empty() || t.effect == taint.effect)
    })
}

fn node_selector_satisfied(pod: &PodRequirements, node: &Node) -> bool {
    pod.node_selector
        .iter()
        .all(|(k, v)| node.labels.get(k) == Some(v))
}

fn requirement_satisfied(req: &NodeSelectorRequirement, node: &Node) -> bool {
    let field_value = match req.key.as_str() {
        "metadata.name" => Some(node.name.clone()),
        _ => node.labels.get(&req.key).cloned(),
    };
    match req.operator.as_str() {
        "In" => field_value.map(|v| req.values.contains(&v)).unwrap_or(false),
        "NotIn" => field_value.map(|v| !req.values.contains(&v)).unwrap_or(true),
        "Exists" => field_value.is_some(),
        "DoesNotExist" => field_value.is_none(),
        _ => false,
    }
}

fn affinity_satisfied(pod: &PodRequirements, node: &Node) -> bool {
    pod.affinity
        .match_expressions
        .iter()
        .all(|r| requirement_satisfied(r, node))
        && pod
            .affinity
            .match_fields
            .iter()
            .all(|r| requirement_satisfied(r, node))
        && pod
            .node_anti_affinities
            .iter()
            .all(|a| a.node_id != node.id)
}

/// Checks whether `node` fits `pod` at `priority`, per spec.md §4.3's four
/// clauses (a)-(d). Returns the first failing reason, or `Ok(())` if all
/// four are satisfied.
pub fn fits(
    node: &Node,
    pod: &PodRequirements,
    priority: i32,
    factory: &ResourceListFactory,
) -> Result<(), UnfitReason> {
    for taint in &node.taints {
        if !tolerates_taint(pod, taint) {
            return Err(UnfitReason::UntoleratedTaint(taint.key.clone()));
        }
    }
    if !affinity_satisfied(pod, node) {
        return Err(UnfitReason::AffinityNotSatisfied);
    }
    if !node_selector_satisfied(pod, node) {
        return Err(UnfitReason::NodeSelectorNotSatisfied);
    }

    let requests = factory.from_request_map(&pod.resource_requests).round_up();
    let allocatable = node.allocatable_at(priority).round_down();
    for (idx, name) in factory.names().iter().enumerate() {
        if requests.as_slice()[idx] > allocatable.as_slice()[idx] {
            return Err(UnfitReason::InsufficientResource(name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceListFactory;
    use std::collections::BTreeMap;

    fn factory() -> ResourceListFactory {
        ResourceListFactory::new(vec![("cpu".into(), 1)]).unwrap()
    }

    fn node(cpu: i64) -> Node {
        let f = factory();
        Node::new(
            "n1".into(),
            "type-a".into(),
            0,
            "exec-1".into(),
            "n1".into(),
            vec![],
            BTreeMap::new(),
            f.from_pairs(&[("cpu", cpu)]).unwrap(),
            &[0],
        )
    }

    #[test]
    fn fits_when_resources_available() {
        let n = node(8);
        let mut pod = PodRequirements::default();
        pod.resource_requests.insert("cpu".into(), 4);
        assert!(fits(&n, &pod, 0, &factory()).is_ok());
    }

    #[test]
    fn zero_request_always_fits() {
        let n = node(0);
        let mut pod = PodRequirements::default();
        pod.resource_requests.insert("cpu".into(), 0);
        assert!(fits(&n, &pod, 0, &factory()).is_ok());
    }

    #[test]
    fn unknown_resource_is_ignored() {
        let n = node(0);
        let mut pod = PodRequirements::default();
        pod.resource_requests.insert("gpu".into(), 4);
        assert!(fits(&n, &pod, 0, &factory()).is_ok());
    }

    #[test]
    fn untolerated_noschedule_taint_blocks() {
        let mut n = node(8);
        n.taints.push(crate::jobdb::job::Taint {
            key: "dedicated".into(),
            value: "ml".into(),
            effect: "NoSchedule".into(),
        });
        let pod = PodRequirements::default();
        assert_eq!(
            fits(&n, &pod, 0, &factory()),
            Err(UnfitReason::UntoleratedTaint("dedicated".into()))
        );
    }
}
