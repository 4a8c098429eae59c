//! Microbenchmarks for `ResourceList` arithmetic and DRF cost computation,
//! the hot path of every scheduling round (spec.md §4.1, §4.4).

use ballast_scheduler::resources::ResourceListFactory;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

fn factory(n: usize) -> ResourceListFactory {
    let resources = (0..n).map(|i| (format!("res-{i}"), 1)).collect();
    ResourceListFactory::new(resources).unwrap()
}

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("resource_list_add");
    for n in [4usize, 16, 64] {
        let f = factory(n);
        let pairs: Vec<(&str, i64)> = vec![];
        let a = f.from_pairs(&pairs).unwrap();
        let b = f.from_pairs(&pairs).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bencher, _| {
            bencher.iter(|| a.add(&b));
        });
    }
    group.finish();
}

fn bench_dominant_fraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("dominant_fraction");
    for n in [4usize, 16, 64] {
        let f = factory(n);
        let names: Vec<String> = (0..n).map(|i| format!("res-{i}")).collect();
        let pairs: Vec<(&str, i64)> = names.iter().map(|name| (name.as_str(), 100)).collect();
        let total = f.from_pairs(&pairs).unwrap();
        let alloc = total.scale(0.3);
        let multipliers = vec![1.0; n];
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bencher, _| {
            bencher.iter(|| alloc.dominant_fraction(&total, &multipliers));
        });
    }
    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let f = factory(8);
    let req = f.from_pairs(&[("res-0", 100), ("res-1", 37)]).unwrap();
    c.bench_function("round_up_then_round_down", |bencher| {
        bencher.iter(|| req.round_up().round_down());
    });
}

criterion_group!(benches, bench_add, bench_dominant_fraction, bench_round_trip);
criterion_main!(benches);
