//! Microbenchmarks for `NodeDb`'s bind/evict/select_node_for_job path
//! (spec.md §4.3), the per-round cost of placing and reclaiming work.

use ballast_scheduler::jobdb::job::PodRequirements;
use ballast_scheduler::nodedb::{JobSchedulingRequest, Node, NodeDb};
use ballast_scheduler::resources::ResourceListFactory;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;

fn factory() -> ResourceListFactory {
    ResourceListFactory::new(vec![("cpu".into(), 1), ("memory".into(), 1)]).unwrap()
}

fn node(id: &str, cpu: i64, f: &ResourceListFactory) -> Node {
    Node::new(
        id.into(),
        "type-a".into(),
        0,
        "exec-1".into(),
        id.into(),
        vec![],
        BTreeMap::new(),
        f.from_pairs(&[("cpu", cpu), ("memory", cpu * 1024)]).unwrap(),
        &[0],
    )
}

fn populated_db(num_nodes: usize, f: &ResourceListFactory) -> NodeDb {
    let db = NodeDb::new(f.clone());
    let nodes = (0..num_nodes).map(|i| node(&format!("n{i}"), 32, f)).collect();
    db.upsert(nodes).unwrap();
    db
}

fn bench_bind_and_unbind(c: &mut Criterion) {
    let f = factory();
    let mut group = c.benchmark_group("bind_then_unbind");
    for num_nodes in [1usize, 8, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(num_nodes), &num_nodes, |bencher, &num_nodes| {
            let db = populated_db(num_nodes, &f);
            let req = f.from_pairs(&[("cpu", 4), ("memory", 4096)]).unwrap();
            bencher.iter(|| {
                let mut txn = db.write_txn();
                txn.bind_job_to_node("n0", "bench-job", "q1", &req, 0).unwrap();
                txn.unbind_job_from_node("n0", "bench-job", "q1").unwrap();
                txn.commit().unwrap();
            });
        });
    }
    group.finish();
}

fn bench_select_node_for_job(c: &mut Criterion) {
    let f = factory();
    let mut group = c.benchmark_group("select_node_for_job");
    for num_nodes in [1usize, 8, 64] {
        let db = populated_db(num_nodes, &f);
        let mut pod = PodRequirements::default();
        pod.resource_requests.insert("cpu".into(), 4);
        pod.resource_requests.insert("memory".into(), 4096);
        group.bench_with_input(BenchmarkId::from_parameter(num_nodes), &num_nodes, |bencher, _| {
            let req = JobSchedulingRequest {
                job_id: "bench-job",
                queue: "q1",
                home_priority: 0,
                pod_requirements: &pod,
                away_node_types: &[],
                target_node_id: None,
                is_gang: false,
            };
            bencher.iter(|| {
                let txn = db.write_txn();
                txn.select_node_for_job(&req).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_evict_jobs_from_node(c: &mut Criterion) {
    let f = factory();
    c.bench_function("evict_jobs_from_node", |bencher| {
        let db = populated_db(1, &f);
        let req = f.from_pairs(&[("cpu", 1), ("memory", 1024)]).unwrap();
        {
            let mut txn = db.write_txn();
            for i in 0..16 {
                txn.bind_job_to_node("n0", &format!("j{i}"), "q1", &req, 0).unwrap();
            }
            txn.commit().unwrap();
        }
        let jobs: Vec<(String, String, String)> = (0..16)
            .map(|i| (format!("j{i}"), format!("r{i}"), "q1".to_string()))
            .collect();
        bencher.iter(|| {
            let mut txn = db.write_txn();
            txn.evict_jobs_from_node("n0", &jobs).unwrap();
        });
    });
}

criterion_group!(benches, bench_bind_and_unbind, bench_select_node_for_job, bench_evict_jobs_from_node);
criterion_main!(benches);
