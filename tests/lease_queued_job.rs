//! Scenario 1 (spec.md §8): a queued job with capacity available gets
//! leased onto a node in a single cycle.

mod common;

use ballast_scheduler::cycle::events::Event;

#[tokio::test]
async fn leases_a_queued_job_onto_an_available_node() {
    let (mut cycle, fakes) = common::new_cycle(
        vec![common::queued_job("j1", "q1", 1)],
        vec![common::node("n1", 32)],
        common::cycle_config(32, &[("q1", 1.0)]),
    );

    cycle.run().await.unwrap();

    let published = fakes.publisher.take();
    let leased = published.iter().flat_map(|seq| seq.events.iter()).find(|e| {
        matches!(e, Event::JobRunLeased { job_id, node_id, .. } if job_id == "j1" && node_id == "n1")
    });
    assert!(leased.is_some(), "expected a JobRunLeased event for j1, got {published:?}");

    let read = cycle.jobdb.read_txn();
    let job = cycle.jobdb.get_by_id(&read, "j1").unwrap().unwrap();
    assert!(!job.queued);
    assert_eq!(job.queued_version, 1);
    assert_eq!(job.runs.len(), 1);
    assert_eq!(job.runs[0].node_id, "n1");
}
