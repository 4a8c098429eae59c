//! Dominant Resource Fairness and adjusted fair shares (spec.md §4.4).

use crate::resources::ResourceList;
use std::collections::BTreeMap;

/// DRF cost: `max over tracked resources r of (allocation[r] * multiplier[r]
/// / total[r])` (spec.md §4.4). Unknown resources contribute 0, handled by
/// [`ResourceList::dominant_fraction`].
pub fn drf_cost(allocation: &ResourceList, total: &ResourceList, multipliers: &[f64]) -> f64 {
    allocation.dominant_fraction(total, multipliers)
}

#[derive(Debug, Clone)]
pub struct QueueShareInput {
    pub queue: String,
    pub weight: f64,
    /// Demand capped by per-queue caps (spec.md §4.4).
    pub constrained_demand: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AdjustedFairShares {
    pub demand_capped: BTreeMap<String, f64>,
    pub uncapped: BTreeMap<String, f64>,
}

/// Iterative reshare (spec.md §4.4): start with `weight / total weight`,
/// redistribute what demand-constrained queues can't use, for up to 10
/// iterations or until <1% remains unallocated. Produces both the
/// demand-capped series and the uncapped series, where the uncapped series
/// excludes each queue's own surplus from its own re-grant so undemanding
/// queues are never punished (spec.md §4.4).
pub fn compute_adjusted_fair_shares(queues: &[QueueShareInput]) -> AdjustedFairShares {
    let total_weight: f64 = queues.iter().map(|q| q.weight).sum();
    if total_weight <= 0.0 || queues.is_empty() {
        return AdjustedFairShares::default();
    }

    let demand_capped = reshare(queues, total_weight, true);
    let uncapped = reshare(queues, total_weight, false);

    AdjustedFairShares {
        demand_capped,
        uncapped,
    }
}

/// `redistributable` tracks each queue's share for the purposes of deciding
/// who is over their cap and how much surplus that generates; it is always
/// clipped at `constrained_demand` when exceeded, in both series, so the
/// redistribution dynamics converge identically either way. `recorded` is
/// what's returned: for the demand-capped series it tracks `redistributable`
/// exactly, but for the uncapped series a queue's own entry is never
/// clipped down when it produces surplus — only used to compute how much
/// flows to others — so an over-cap queue keeps its full weight-based
/// entitlement instead of being punished for its own surplus (spec.md
/// §4.4: "excluding each queue's own surplus from its own re-grant").
fn reshare(queues: &[QueueShareInput], total_weight: f64, cap_at_demand: bool) -> BTreeMap<String, f64> {
    let initial: BTreeMap<String, f64> = queues
        .iter()
        .map(|q| (q.queue.clone(), q.weight / total_weight))
        .collect();
    let mut redistributable = initial.clone();
    let mut recorded = initial;

    for _ in 0..10 {
        let mut surplus = 0.0;
        let mut receivers: Vec<&QueueShareInput> = Vec::new();

        for q in queues {
            let current = redistributable[&q.queue];
            if current > q.constrained_demand {
                surplus += current - q.constrained_demand;
                redistributable.insert(q.queue.clone(), q.constrained_demand);
                if cap_at_demand {
                    recorded.insert(q.queue.clone(), q.constrained_demand);
                }
            } else {
                receivers.push(q);
            }
        }

        if surplus < 0.01 || receivers.is_empty() {
            break;
        }

        let redistributable_weight: f64 = receivers.iter().map(|q| q.weight).sum();
        if redistributable_weight <= 0.0 {
            break;
        }
        for q in &receivers {
            let grant = surplus * (q.weight / redistributable_weight);
            *redistributable.get_mut(&q.queue).unwrap() += grant;
            *recorded.get_mut(&q.queue).unwrap() += grant;
        }
    }

    recorded
}
