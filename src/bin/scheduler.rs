//! Scheduler process entry point (SPEC_FULL.md §1 "CLI entry point").
//!
//! Wires configuration, tracing, and the reconciliation loop together. No
//! catalog/Pulsar/leader-election backends ship with this crate (spec.md
//! §1 Non-goals), so the binary always runs against the in-memory
//! `testkit` fakes — useful for local exploration and smoke-testing a
//! config file, not for running an actual cluster.

use ballast_scheduler::config::Configuration;
use ballast_scheduler::cycle::{Cycle, CycleConfig, PoolConfig};
use ballast_scheduler::jobdb::JobDb;
use ballast_scheduler::nodedb::NodeDb;
use ballast_scheduler::resources::ResourceListFactory;
use ballast_scheduler::telemetry;
use ballast_scheduler::testkit::FakeCollaborators;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "scheduler", about = "Cluster-wide batch job scheduling engine")]
struct Cli {
    /// Path to a TOML configuration file layered on top of built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit structured JSON logs instead of human-readable text.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Number of cycles to run before exiting; omit to run until interrupted.
    #[arg(long)]
    cycles: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    telemetry::init(cli.json_logs);

    let config = Configuration::load(cli.config.as_deref())?;
    info!(pools = config.scheduling.pools.len(), "configuration loaded");

    let factory = ResourceListFactory::new(
        config
            .scheduling
            .resources
            .iter()
            .map(|r| (r.name.clone(), r.resolution))
            .collect(),
    )?;

    let priority_classes = config.resolved_priority_classes();
    let jobdb = JobDb::new(factory.clone(), config.scheduling.experimental_prefer_large_job_ordering);
    let nodedb = NodeDb::new(factory.clone());

    let pools: Vec<PoolConfig> = config
        .scheduling
        .pools
        .iter()
        .map(|p| PoolConfig {
            name: p.name.clone(),
            total_resources: factory.from_request_map(&p.total_resources),
            floating_resources: factory.from_request_map(&p.floating_resources),
            drf_multipliers: vec![1.0; factory.len()],
            queue_weights: p.queue_weights.clone(),
        })
        .collect();

    let cycle_config = CycleConfig {
        executor_timeout_secs: config.scheduling.executor_timeout_secs,
        max_retries: config.scheduling.max_retries,
        protected_fraction_of_fair_share: config.scheduling.protected_fraction_of_fair_share,
        max_scheduling_duration: config.max_scheduling_duration(),
        maximum_scheduling_burst: config.scheduling.maximum_scheduling_burst,
        maximum_resource_fraction_to_schedule: config.scheduling.maximum_resource_fraction_to_schedule.clone(),
        maximum_per_queue_resource_fraction: config.scheduling.maximum_per_queue_resource_fraction.clone(),
        maximum_scheduling_rate: config.scheduling.maximum_scheduling_rate,
        maximum_scheduling_burst_tokens: config.scheduling.maximum_scheduling_burst as f64,
        maximum_per_queue_scheduling_rate: config.scheduling.maximum_per_queue_scheduling_rate,
        maximum_per_queue_scheduling_burst: config.scheduling.maximum_per_queue_scheduling_burst,
        pools,
    };

    let fakes = FakeCollaborators::default();
    let mut cycle = Cycle::new(
        jobdb,
        nodedb,
        factory,
        priority_classes,
        cycle_config,
        fakes.job_repository.clone() as Arc<dyn ballast_scheduler::cycle::interfaces::JobRepository>,
        fakes.executor_repository.clone() as Arc<dyn ballast_scheduler::cycle::interfaces::ExecutorRepository>,
        fakes.publisher.clone() as Arc<dyn ballast_scheduler::cycle::interfaces::Publisher>,
        fakes.leader_controller.clone() as Arc<dyn ballast_scheduler::cycle::interfaces::LeaderController>,
        fakes.submit_checker.clone() as Arc<dyn ballast_scheduler::cycle::interfaces::SubmitChecker>,
        fakes.clock.clone() as Arc<dyn ballast_scheduler::cycle::interfaces::Clock>,
    );

    let mut interval = tokio::time::interval(config.cycle_period());
    let mut ran = 0u64;
    loop {
        interval.tick().await;
        cycle.run().await?;
        ran += 1;
        if let Some(limit) = cli.cycles {
            if ran >= limit {
                break;
            }
        }
    }

    Ok(())
}
