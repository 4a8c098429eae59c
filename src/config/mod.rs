//! Configuration loading and validation (SPEC_FULL.md §1 "Configuration",
//! §2 "Configuration validation"; grounded on
//! `examples/original_source/internal/scheduler/configuration/configuration.go`).

use crate::error::ConfigError;
use crate::jobdb::job::{AwayNodeType, PriorityClass};
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Mirrors the Go source's `NodeIdLabel` constant (configuration.go).
pub const DEFAULT_NODE_ID_LABEL: &str = "ballast.io/nodeId";

fn default_node_id_label() -> String {
    DEFAULT_NODE_ID_LABEL.to_string()
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ResourceConfig {
    pub name: String,
    pub resolution: i64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AwayNodeTypeConfig {
    pub name: String,
    pub priority: i32,
    pub well_known_toleration_key: String,
    pub well_known_toleration_value: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PriorityClassConfig {
    pub priority: i32,
    pub preemptible: bool,
    #[serde(default)]
    pub away_node_types: Vec<AwayNodeTypeConfig>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PoolConfig {
    pub name: String,
    pub total_resources: BTreeMap<String, i64>,
    #[serde(default)]
    pub floating_resources: BTreeMap<String, i64>,
    #[serde(default)]
    pub queue_weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LeaderConfig {
    /// "standalone" or "kubernetes" in the original; this crate only ships
    /// the `standalone` in-memory implementation (`testkit::AlwaysLeader`) —
    /// see SPEC_FULL.md §1's note on out-of-scope production adapters.
    pub mode: String,
    #[serde(default)]
    pub pod_name: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct HttpConfig {
    pub port: u16,
}

/// Scheduling-specific configuration (configuration.go's `SchedulingConfig`).
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SchedulingConfig {
    pub interned_strings_cache_size: u32,
    pub cycle_period_secs: u64,
    pub schedule_period_secs: u64,
    pub max_scheduling_duration_secs: u64,
    pub executor_timeout_secs: i64,
    pub database_fetch_size: u32,
    pub queue_refresh_period_secs: u64,
    pub protected_fraction_of_fair_share: f64,
    #[serde(default = "default_node_id_label")]
    pub node_id_label: String,
    pub max_retries: u32,
    pub maximum_scheduling_rate: f64,
    pub maximum_scheduling_burst: usize,
    pub maximum_per_queue_scheduling_rate: f64,
    pub maximum_per_queue_scheduling_burst: f64,
    #[serde(default)]
    pub maximum_resource_fraction_to_schedule: BTreeMap<String, f64>,
    #[serde(default)]
    pub maximum_per_queue_resource_fraction: BTreeMap<String, f64>,
    pub priority_classes: BTreeMap<String, PriorityClassConfig>,
    pub resources: Vec<ResourceConfig>,
    pub pools: Vec<PoolConfig>,
    /// Experimental candidate-gang ordering switch (spec.md §9 Open
    /// Questions, resolved in DESIGN.md as a per-`JobDb` boolean).
    #[serde(default)]
    pub experimental_prefer_large_job_ordering: bool,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct Configuration {
    pub scheduling: SchedulingConfig,
    pub leader: LeaderConfig,
    pub http: HttpConfig,
}

impl Configuration {
    /// Layered load: built-in defaults, then an optional file, then
    /// `BALLAST_`-prefixed environment overrides (SPEC_FULL.md §1
    /// "Configuration").
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder().add_source(config::File::from_str(DEFAULT_CONFIG_TOML, config::FileFormat::Toml));
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("BALLAST").separator("__"));
        let settings = builder.build()?;
        let cfg: Configuration = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Enforces the same non-zero/non-negative constraints the original
    /// source tags `validate:"required"`/`validate:"gte=0"`/`validate:"gt=0"`
    /// (SPEC_FULL.md §2 "Configuration validation").
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scheduling;
        require_positive("scheduling.interned_strings_cache_size", s.interned_strings_cache_size as f64)?;
        require_positive("scheduling.cycle_period_secs", s.cycle_period_secs as f64)?;
        require_positive("scheduling.schedule_period_secs", s.schedule_period_secs as f64)?;
        require_positive("scheduling.max_scheduling_duration_secs", s.max_scheduling_duration_secs as f64)?;
        require_positive("scheduling.executor_timeout_secs", s.executor_timeout_secs as f64)?;
        require_positive("scheduling.database_fetch_size", s.database_fetch_size as f64)?;
        require_positive("scheduling.queue_refresh_period_secs", s.queue_refresh_period_secs as f64)?;
        require_non_negative("scheduling.protected_fraction_of_fair_share", s.protected_fraction_of_fair_share)?;
        require_positive("scheduling.maximum_scheduling_rate", s.maximum_scheduling_rate)?;
        require_positive("scheduling.maximum_scheduling_burst", s.maximum_scheduling_burst as f64)?;
        require_positive("scheduling.maximum_per_queue_scheduling_rate", s.maximum_per_queue_scheduling_rate)?;
        require_positive("scheduling.maximum_per_queue_scheduling_burst", s.maximum_per_queue_scheduling_burst as f64)?;
        if s.node_id_label.is_empty() {
            return Err(ConfigError::MissingRequired("scheduling.node_id_label".to_string()));
        }
        if self.leader.mode.is_empty() {
            return Err(ConfigError::MissingRequired("leader.mode".to_string()));
        }
        if self.http.port == 0 {
            return Err(ConfigError::MissingRequired("http.port".to_string()));
        }
        for pool in &s.pools {
            if pool.name.is_empty() {
                return Err(ConfigError::MissingRequired("scheduling.pools[].name".to_string()));
            }
        }
        Ok(())
    }

    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs(self.scheduling.cycle_period_secs)
    }

    pub fn max_scheduling_duration(&self) -> Duration {
        Duration::from_secs(self.scheduling.max_scheduling_duration_secs)
    }

    /// Resolves `priority_classes` into the runtime [`PriorityClass`] map
    /// used by `jobdb`/`queue`.
    pub fn resolved_priority_classes(&self) -> BTreeMap<String, PriorityClass> {
        self.scheduling
            .priority_classes
            .iter()
            .map(|(name, pc)| {
                (
                    name.clone(),
                    PriorityClass {
                        name: name.clone(),
                        priority: pc.priority,
                        preemptible: pc.preemptible,
                        away_node_types: pc
                            .away_node_types
                            .iter()
                            .map(|a| AwayNodeType {
                                name: a.name.clone(),
                                priority: a.priority,
                                well_known_toleration_key: a.well_known_toleration_key.clone(),
                                well_known_toleration_value: a.well_known_toleration_value.clone(),
                            })
                            .collect(),
                    },
                )
            })
            .collect()
    }
}

fn require_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::BelowMinimum {
            field: field.to_string(),
            min: f64::MIN_POSITIVE,
            value,
        })
    }
}

fn require_non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::BelowMinimum {
            field: field.to_string(),
            min: 0.0,
            value,
        })
    }
}

/// Built-in defaults layer, overridden by an optional file and then by
/// environment variables (SPEC_FULL.md §1 "layered: defaults → file →
/// environment overrides").
const DEFAULT_CONFIG_TOML: &str = r#"
[scheduling]
interned_strings_cache_size = 100000
cycle_period_secs = 1
schedule_period_secs = 10
max_scheduling_duration_secs = 5
executor_timeout_secs = 60
database_fetch_size = 1000
queue_refresh_period_secs = 10
protected_fraction_of_fair_share = 1.0
max_retries = 5
maximum_scheduling_rate = 100.0
maximum_scheduling_burst = 5000
maximum_per_queue_scheduling_rate = 50.0
maximum_per_queue_scheduling_burst = 1000.0
resources = [{ name = "cpu", resolution = 1 }, { name = "memory", resolution = 1048576 }]
pools = []

[scheduling.priority_classes]

[leader]
mode = "standalone"

[http]
port = 8080
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        let cfg = Configuration::load(None).unwrap();
        assert_eq!(cfg.scheduling.node_id_label, DEFAULT_NODE_ID_LABEL);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn negative_protected_fraction_is_rejected() {
        let mut cfg = Configuration::load(None).unwrap();
        cfg.scheduling.protected_fraction_of_fair_share = -0.1;
        assert!(matches!(cfg.validate(), Err(ConfigError::BelowMinimum { .. })));
    }
}
