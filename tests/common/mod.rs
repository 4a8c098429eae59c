//! Shared fixtures for the end-to-end cycle tests (spec.md §8).

use ballast_scheduler::cycle::interfaces::Clock;
use ballast_scheduler::cycle::{Cycle, CycleConfig, PoolConfig};
use ballast_scheduler::jobdb::{
    GangInfo, Job, JobRun, PodRequirements, PriorityClass, SchedulingInfo, SchedulingMethod,
};
use ballast_scheduler::nodedb::Node;
use ballast_scheduler::resources::ResourceListFactory;
use ballast_scheduler::testkit::FakeCollaborators;
use std::collections::BTreeMap;
use std::time::Duration;

pub fn factory() -> ResourceListFactory {
    ResourceListFactory::new(vec![("cpu".into(), 1)]).unwrap()
}

pub fn priority_classes() -> BTreeMap<String, PriorityClass> {
    let mut m = BTreeMap::new();
    m.insert(
        "pc0".to_string(),
        PriorityClass {
            name: "pc0".to_string(),
            priority: 1,
            preemptible: true,
            away_node_types: vec![],
        },
    );
    m
}

pub fn queued_job(id: &str, queue: &str, cpu: i64) -> Job {
    let mut pod = PodRequirements::default();
    pod.resource_requests.insert("cpu".to_string(), cpu);
    Job {
        job_id: id.to_string(),
        queue: queue.to_string(),
        job_set: "set-a".to_string(),
        priority: 1,
        submitted_time: 100,
        priority_class_name: "pc0".to_string(),
        scheduling_info: SchedulingInfo {
            version: 0,
            priority_class_name: "pc0".to_string(),
            priority_class_name_override: None,
            pod_requirements: pod,
        },
        gang_info: GangInfo::singleton(id),
        queued: true,
        queued_version: 0,
        cancel_requested: false,
        cancel_by_job_set_requested: false,
        cancelled: false,
        failed: false,
        succeeded: false,
        validated: true,
        runs: vec![],
        bid_prices: Default::default(),
        pools: vec!["pool-a".to_string()],
        fail_fast: false,
        max_retries_seen: 0,
    }
}

/// A job with one active run bound to `node_id`, as if leased by a previous
/// cycle (scenarios 2, 3, 6 all start from this state).
pub fn running_job(id: &str, queue: &str, cpu: i64, node_id: &str, created_at: i64) -> Job {
    let mut job = queued_job(id, queue, cpu);
    job.queued = false;
    job.queued_version = 1;
    job.runs.push(JobRun {
        run_id: format!("{id}-run-0"),
        job_id: id.to_string(),
        executor: "exec-1".to_string(),
        node_id: node_id.to_string(),
        node_name: node_id.to_string(),
        pool: "pool-a".to_string(),
        created_at,
        scheduled_at_priority: 1,
        scheduling_method: SchedulingMethod::Home,
        running: true,
        succeeded: false,
        failed: false,
        returned: false,
        cancelled: false,
        attempted: true,
        preempt_requested: false,
        pending: false,
    });
    job
}

pub fn node(id: &str, cpu: i64) -> Node {
    Node::new(
        id.to_string(),
        "type-a".to_string(),
        0,
        "exec-1".to_string(),
        id.to_string(),
        vec![],
        BTreeMap::new(),
        factory().from_pairs(&[("cpu", cpu)]).unwrap(),
        &[1],
    )
}

pub fn cycle_config(pool_cpu: i64, queue_weights: &[(&str, f64)]) -> CycleConfig {
    let factory = factory();
    CycleConfig {
        executor_timeout_secs: 60,
        max_retries: 2,
        protected_fraction_of_fair_share: 0.5,
        max_scheduling_duration: Duration::from_secs(5),
        maximum_scheduling_burst: 100,
        maximum_resource_fraction_to_schedule: BTreeMap::new(),
        maximum_per_queue_resource_fraction: BTreeMap::new(),
        maximum_scheduling_rate: 1000.0,
        maximum_scheduling_burst_tokens: 1000.0,
        maximum_per_queue_scheduling_rate: 1000.0,
        maximum_per_queue_scheduling_burst: 1000.0,
        pools: vec![PoolConfig {
            name: "pool-a".to_string(),
            total_resources: factory.from_pairs(&[("cpu", pool_cpu)]).unwrap(),
            floating_resources: factory.zero(),
            drf_multipliers: vec![1.0],
            queue_weights: queue_weights.iter().map(|(q, w)| (q.to_string(), *w)).collect(),
        }],
    }
}

pub fn new_cycle(jobs: Vec<Job>, nodes: Vec<Node>, config: CycleConfig) -> (Cycle, std::sync::Arc<FakeCollaborators>) {
    let factory = factory();
    let jobdb = ballast_scheduler::jobdb::JobDb::new(factory.clone(), false);
    let nodedb = ballast_scheduler::nodedb::NodeDb::new(factory.clone());
    nodedb.upsert(nodes).unwrap();

    let known: std::collections::HashSet<String> = priority_classes().keys().cloned().collect();
    {
        let mut write = jobdb.write_txn();
        write.upsert(jobs, &known).unwrap();
        write.commit().unwrap();
    }

    let fakes = std::sync::Arc::new(FakeCollaborators::default());
    let cycle = Cycle::new(
        jobdb,
        nodedb,
        factory,
        priority_classes(),
        config,
        fakes.job_repository.clone(),
        fakes.executor_repository.clone(),
        fakes.publisher.clone(),
        fakes.leader_controller.clone(),
        fakes.submit_checker.clone(),
        fakes.clock.clone(),
    );
    (cycle, fakes)
}

#[allow(dead_code)]
pub fn clock_now(fakes: &FakeCollaborators) -> i64 {
    fakes.clock.now()
}
