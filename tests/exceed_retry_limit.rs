//! Scenario 5 (spec.md §8): a job already returned `maxRetries` times fails
//! terminally on the next return instead of being requeued again.

mod common;

use ballast_scheduler::cycle::events::Event;
use ballast_scheduler::cycle::interfaces::{RunDelta, RunRow};
use ballast_scheduler::error::JobErrorReason;

#[tokio::test]
async fn a_job_returned_beyond_max_retries_fails_terminally() {
    let mut job = common::running_job("j1", "q1", 1, "n1", 100);
    job.max_retries_seen = 2; // max_retries is 2 (common::cycle_config); this is the third return.

    let (mut cycle, fakes) = common::new_cycle(
        vec![job],
        vec![common::node("n1", 32)],
        common::cycle_config(32, &[("q1", 1.0)]),
    );

    fakes.job_repository.push_update(
        vec![],
        vec![RunRow::Delta(RunDelta {
            run_id: "j1-run-0".to_string(),
            job_id: "j1".to_string(),
            returned: Some(true),
            failed: Some(true),
            ..Default::default()
        })],
    );

    cycle.run().await.unwrap();

    let published = fakes.publisher.take();
    let events: Vec<&Event> = published.iter().flat_map(|seq| seq.events.iter()).collect();
    assert!(
        events.iter().any(|e| matches!(
            e,
            Event::JobErrors { job_id, errors }
                if job_id == "j1" && errors.contains(&JobErrorReason::MaxRunsExceeded)
        )),
        "expected JobErrors(MaxRunsExceeded) for j1, got {events:?}"
    );
    assert!(
        !events.iter().any(|e| matches!(e, Event::JobRequeued { job_id, .. } if job_id == "j1")),
        "j1 should not have been requeued again, got {events:?}"
    );

    let read = cycle.jobdb.read_txn();
    let job = cycle.jobdb.get_by_id(&read, "j1").unwrap().unwrap();
    assert!(job.failed);
    assert!(job.terminal());
    // queuedVersion never advances past its pre-failure value (no requeue happened).
    assert_eq!(job.queued_version, 1);
}
