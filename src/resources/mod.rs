//! Compact fixed-layout resource vectors (spec.md §4.1).
//!
//! [`ResourceList`] stores one `i64` quantity per configured resource name, in
//! a canonical order fixed at startup by [`ResourceListFactory`]. All
//! arithmetic is O(#resources) and allocation-free: two lists built from the
//! same factory always have the same length and the same index for a given
//! resource name, so operations are plain elementwise loops.

use crate::error::ResourceError;
use std::sync::Arc;

/// The reserved priority bucket holding resources freed by recently-evicted
/// jobs (spec.md §3, Node entity). Chosen below any real priority class.
pub const EVICTED_PRIORITY: i32 = i32::MIN;

/// Canonical resource ordering plus per-resource index resolutions, shared
/// (via `Arc`) by every [`ResourceList`] built from it so that two lists are
/// comparable without re-checking names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceListFactory {
    names: Arc<Vec<String>>,
    /// Rounding resolution per resource, in the same unit as quantities.
    resolutions: Arc<Vec<i64>>,
}

impl ResourceListFactory {
    /// Builds a factory from `(name, resolution)` pairs in the order they
    /// should be indexed. Resolutions must be positive, and a resource
    /// indexed by [`crate::nodedb::NodeDb`] at a coarser resolution must be
    /// evenly divided by the resolution configured here (spec.md §4.1).
    pub fn new(resources: Vec<(String, i64)>) -> Result<Self, ResourceError> {
        let mut names = Vec::with_capacity(resources.len());
        let mut resolutions = Vec::with_capacity(resources.len());
        for (name, resolution) in resources {
            if resolution <= 0 {
                return Err(ResourceError::NonPositiveResolution { name, resolution });
            }
            names.push(name);
            resolutions.push(resolution);
        }
        Ok(Self {
            names: Arc::new(names),
            resolutions: Arc::new(resolutions),
        })
    }

    /// Validates that `index_resolution` (used by a NodeDb bucket index) is
    /// evenly divided by the per-resource resolution configured here.
    pub fn validate_index_resolution(&self, name: &str, index_resolution: i64) -> Result<(), ResourceError> {
        let idx = self.index_of(name)?;
        let own = self.resolutions[idx];
        if index_resolution % own != 0 {
            return Err(ResourceError::ResolutionMismatch {
                name: name.to_string(),
                parent: index_resolution,
                child: own,
            });
        }
        Ok(())
    }

    pub fn index_of(&self, name: &str) -> Result<usize, ResourceError> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| ResourceError::UnknownResource(name.to_string()))
    }

    pub fn resolution_of(&self, name: &str) -> Result<i64, ResourceError> {
        Ok(self.resolutions[self.index_of(name)?])
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Builds a zero-valued list in this factory's canonical order.
    pub fn zero(&self) -> ResourceList {
        ResourceList {
            factory: self.clone(),
            quantities: vec![0; self.names.len()],
        }
    }

    /// Builds a list from `(name, quantity)` pairs; unlisted resources are
    /// zero. Unknown names are rejected (unlike pod requests, where unknown
    /// resource names are ignored per spec.md §4.3's numeric policy).
    pub fn from_pairs(&self, pairs: &[(&str, i64)]) -> Result<ResourceList, ResourceError> {
        let mut quantities = vec![0; self.names.len()];
        for (name, qty) in pairs {
            let idx = self.index_of(name)?;
            quantities[idx] = *qty;
        }
        Ok(ResourceList {
            factory: self.clone(),
            quantities,
        })
    }

    /// Builds a list from a raw quantity vector, requesting a request/limit
    /// map where an unknown resource name is ignored (treated as zero), per
    /// spec.md §4.3.
    pub fn from_request_map(&self, requests: &std::collections::BTreeMap<String, i64>) -> ResourceList {
        let mut quantities = vec![0; self.names.len()];
        for (name, qty) in requests {
            if let Ok(idx) = self.index_of(name) {
                quantities[idx] = *qty;
            }
        }
        ResourceList {
            factory: self.clone(),
            quantities,
        }
    }
}

/// A fixed-layout vector of resource quantities, all sharing a
/// [`ResourceListFactory`]. See spec.md §4.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceList {
    factory: ResourceListFactory,
    quantities: Vec<i64>,
}

impl ResourceList {
    pub fn factory(&self) -> &ResourceListFactory {
        &self.factory
    }

    pub fn get(&self, name: &str) -> i64 {
        match self.factory.index_of(name) {
            Ok(idx) => self.quantities[idx],
            Err(_) => 0,
        }
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.quantities
    }

    fn zip_with(&self, other: &ResourceList, f: impl Fn(i64, i64) -> i64) -> ResourceList {
        debug_assert_eq!(self.factory, other.factory, "ResourceLists from different factories");
        ResourceList {
            factory: self.factory.clone(),
            quantities: self
                .quantities
                .iter()
                .zip(other.quantities.iter())
                .map(|(a, b)| f(*a, *b))
                .collect(),
        }
    }

    pub fn add(&self, other: &ResourceList) -> ResourceList {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn subtract(&self, other: &ResourceList) -> ResourceList {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn negate(&self) -> ResourceList {
        ResourceList {
            factory: self.factory.clone(),
            quantities: self.quantities.iter().map(|q| -q).collect(),
        }
    }

    pub fn max(&self, other: &ResourceList) -> ResourceList {
        self.zip_with(other, std::cmp::max)
    }

    pub fn is_zero(&self) -> bool {
        self.quantities.iter().all(|q| *q == 0)
    }

    pub fn has_negative(&self) -> bool {
        self.quantities.iter().any(|q| *q < 0)
    }

    /// True iff every component of `self` is `<= other`'s component,
    /// used by the allocatable-by-priority monotonicity invariant
    /// (spec.md §3, §8).
    pub fn le(&self, other: &ResourceList) -> bool {
        self.quantities
            .iter()
            .zip(other.quantities.iter())
            .all(|(a, b)| a <= b)
    }

    /// The dominant resource fraction of `self` against `total`, i.e.
    /// `max_r(self[r] * multiplier[r] / total[r])`, used to build DRF costs
    /// (spec.md §4.4). `multipliers` defaults to 1 for unlisted resources;
    /// a resource absent from `total` (zero) contributes 0, not NaN/Inf.
    pub fn dominant_fraction(&self, total: &ResourceList, multipliers: &[f64]) -> f64 {
        debug_assert_eq!(self.factory, total.factory);
        self.quantities
            .iter()
            .zip(total.quantities.iter())
            .enumerate()
            .map(|(i, (self_q, total_q))| {
                if *total_q == 0 {
                    0.0
                } else {
                    let m = multipliers.get(i).copied().unwrap_or(1.0);
                    (*self_q as f64 * m) / *total_q as f64
                }
            })
            .fold(0.0_f64, f64::max)
    }

    /// Scales every component by `factor`, rounding toward zero. Used to
    /// turn a fractional fair share into a concrete resource target
    /// (spec.md §4.7 step 1).
    pub fn scale(&self, factor: f64) -> ResourceList {
        ResourceList {
            factory: self.factory.clone(),
            quantities: self.quantities.iter().map(|q| (*q as f64 * factor) as i64).collect(),
        }
    }

    /// Clips every negative component to zero.
    pub fn clip_negative(&self) -> ResourceList {
        ResourceList {
            factory: self.factory.clone(),
            quantities: self.quantities.iter().map(|q| (*q).max(0)).collect(),
        }
    }

    /// Rounds every component *down* to the factory's per-resource
    /// resolution, for NodeDb bucket indexing (spec.md §4.3).
    pub fn round_down(&self) -> ResourceList {
        let quantities = self
            .quantities
            .iter()
            .zip(self.factory.resolutions.iter())
            .map(|(q, res)| q.div_euclid(*res) * res)
            .collect();
        ResourceList {
            factory: self.factory.clone(),
            quantities,
        }
    }

    /// Rounds every component *up* to the factory's per-resource
    /// resolution, used when rounding a pod's requests before the fit check
    /// (spec.md §4.3). A request of zero rounds to zero and is always
    /// satisfied.
    pub fn round_up(&self) -> ResourceList {
        let quantities = self
            .quantities
            .iter()
            .zip(self.factory.resolutions.iter())
            .map(|(q, res)| {
                if *q == 0 {
                    0
                } else {
                    let rem = q.rem_euclid(*res);
                    if rem == 0 {
                        *q
                    } else {
                        q + (*res - rem)
                    }
                }
            })
            .collect();
        ResourceList {
            factory: self.factory.clone(),
            quantities,
        }
    }
}

/// Sums a map of per-key resource lists, as Armada's `RlMapSumValues` does
/// (see `examples/original_source/internal/scheduler/internaltypes/resource_list_map_util.go`).
pub fn sum_values<K>(map: &std::collections::BTreeMap<K, ResourceList>, zero: ResourceList) -> ResourceList
where
    K: Ord,
{
    map.values().fold(zero, |acc, v| acc.add(v))
}
