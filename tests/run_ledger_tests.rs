// Integration tests for the run ledger, crash reconciliation and the event log.
// Run with: INBOX_TEST_DATABASE_URL=postgres://... cargo test -- --ignored

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod support;

use chrono::{TimeDelta, Utc};
use inbox::orchestrator::RetryPolicy;
use inbox::{
    AgentEventType, AgentId, AgentStatus, ClaimedItem, InboxError, ItemDisposition,
    NewAgentEvent, NewRun, ReconcileScope, RunCompletion, RunFailure, RunId, RunStatus, Session,
    WorkItem, WorkItemStatus,
};
use serde_json::json;
use support::{backdate_in_flight, enqueue_message, provision, test_db, work_item, worker, TestDb};

async fn claim_and_start(test: &TestDb, session: &Session) -> (WorkItem, RunId) {
    claim_and_start_as(test, session, &worker("worker-a")).await
}

async fn claim_and_start_as(
    test: &TestDb,
    session: &Session,
    scope: &ReconcileScope,
) -> (WorkItem, RunId) {
    let item = match test.db.claim_next_item().await.expect("claim") {
        Some(ClaimedItem::Ready(item)) => item,
        other => panic!("Expected a ready item, got {other:?}"),
    };
    let run = NewRun {
        id: RunId::generate(),
        agent_id: item.agent_id.clone(),
        session_id: session.session_id.clone(),
        inbox_id: Some(item.id.clone()),
    };
    let run_id = test
        .db
        .start_run(&run, &scope.worker_id)
        .await
        .expect("start run");
    (item, run_id)
}

async fn complete(test: &TestDb, item: &WorkItem, run_id: &RunId) {
    test.db
        .complete_run(&RunCompletion {
            run_id: run_id.clone(),
            item_id: item.id.clone(),
            agent_id: item.agent_id.clone(),
            exit_code: 0,
            finished_at: Utc::now(),
        })
        .await
        .expect("complete run");
}

fn failure(item: &WorkItem, run_id: &RunId, error: &str) -> RunFailure {
    RunFailure {
        run_id: run_id.clone(),
        item_id: item.id.clone(),
        error: error.to_string(),
        exit_code: Some(1),
        signal: None,
        finished_at: Utc::now(),
    }
}

#[tokio::test]
#[ignore = "requires DATABASE_URL or INBOX_TEST_DATABASE_URL"]
async fn given_started_run_when_completed_then_item_done_and_session_touched() {
    let test = test_db().await;
    let session = provision(&test.db, "agt_x", AgentStatus::Active).await;
    enqueue_message(&test.db, "agt_x", "What's my best seller?", 0).await;
    let (item, run_id) = claim_and_start(&test, &session).await;

    assert!(test.db.mark_run_running(&run_id, 4242).await.expect("mark running"));
    let started = test.db.get_run(&run_id).await.expect("get run").expect("run exists");
    assert_eq!(started.status, RunStatus::Running);
    assert_eq!(started.pid, Some(4242));

    complete(&test, &item, &run_id).await;

    let run = test.db.get_run(&run_id).await.expect("get run").expect("run exists");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.exit_code, Some(0));
    assert!(run.finished_at.is_some());
    assert_eq!(work_item(&test.db, &item.id).await.status, WorkItemStatus::Done);

    let session = test
        .db
        .get_session(&AgentId::new("agt_x"))
        .await
        .expect("get session")
        .expect("session exists");
    let last_run_at = session.last_run_at.expect("last_run_at stamped");
    assert!(Utc::now() - last_run_at < TimeDelta::seconds(5));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL or INBOX_TEST_DATABASE_URL"]
async fn given_run_in_flight_when_another_starts_for_same_agent_then_rejected() {
    let test = test_db().await;
    let session = provision(&test.db, "agt_x", AgentStatus::Active).await;
    enqueue_message(&test.db, "agt_x", "hello", 0).await;
    claim_and_start(&test, &session).await;

    let second = test
        .db
        .start_run(
            &NewRun {
                id: RunId::generate(),
                agent_id: AgentId::new("agt_x"),
                session_id: session.session_id.clone(),
                inbox_id: None,
            },
            &worker("worker-b").worker_id,
        )
        .await;
    assert!(matches!(second, Err(InboxError::AgentError(ref m)) if m.contains("in flight")));
    assert_eq!(test.db.in_flight_runs().await.expect("in flight").len(), 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL or INBOX_TEST_DATABASE_URL"]
async fn given_retryable_failure_then_item_requeued_with_exponential_backoff() {
    let test = test_db().await;
    let session = provision(&test.db, "agt_x", AgentStatus::Active).await;
    enqueue_message(&test.db, "agt_x", "hello", 0).await;
    let (item, run_id) = claim_and_start(&test, &session).await;

    let failure = failure(&item, &run_id, "Process exited with code 1: boom");
    let disposition = RetryPolicy::new(3).disposition(item.attempt_count, true, failure.finished_at);
    test.db.fail_run(&failure, &disposition).await.expect("fail run");

    let requeued = work_item(&test.db, &item.id).await;
    assert_eq!(requeued.status, WorkItemStatus::Queued);
    assert_eq!(requeued.attempt_count, 1);
    let delay = requeued.available_at - failure.finished_at;
    assert!((delay - TimeDelta::seconds(1)).num_milliseconds().abs() < 5);
    assert!(test.db.claim_next_item().await.expect("claim").is_none());

    let run = test.db.get_run(&run_id).await.expect("get run").expect("run exists");
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.exit_code, Some(1));
    assert_eq!(run.error.as_deref(), Some("Process exited with code 1: boom"));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL or INBOX_TEST_DATABASE_URL"]
async fn given_terminal_failure_then_item_failed_with_reason() {
    let test = test_db().await;
    let session = provision(&test.db, "agt_x", AgentStatus::Active).await;
    enqueue_message(&test.db, "agt_x", "hello", 0).await;
    let (item, run_id) = claim_and_start(&test, &session).await;

    test.db
        .fail_run(
            &failure(&item, &run_id, "Executable not found: claude"),
            &ItemDisposition::Fail,
        )
        .await
        .expect("fail run");

    let failed = work_item(&test.db, &item.id).await;
    assert_eq!(failed.status, WorkItemStatus::Failed);
    assert_eq!(failed.last_error.as_deref(), Some("Executable not found: claude"));
    assert!(failed.processed_at.is_some());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL or INBOX_TEST_DATABASE_URL"]
async fn given_restarted_worker_when_reconciled_twice_then_its_runs_fail_once() {
    let test = test_db().await;
    let session = provision(&test.db, "agt_x", AgentStatus::Active).await;
    enqueue_message(&test.db, "agt_x", "mid-run", 0).await;
    let (item, run_id) = claim_and_start(&test, &session).await;

    let first = test
        .db
        .reconcile_stalled_runs(&worker("worker-a"))
        .await
        .expect("reconcile");
    assert_eq!(first.runs_failed, 1);
    assert_eq!(first.items_requeued, 1);

    let run = test.db.get_run(&run_id).await.expect("get run").expect("run exists");
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("Worker crashed"));
    let requeued = work_item(&test.db, &item.id).await;
    assert_eq!(requeued.status, WorkItemStatus::Queued);
    assert_eq!(requeued.attempt_count, 0);

    let second = test
        .db
        .reconcile_stalled_runs(&worker("worker-a"))
        .await
        .expect("reconcile again");
    assert!(second.is_noop());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL or INBOX_TEST_DATABASE_URL"]
async fn given_live_peer_run_when_another_worker_starts_then_the_run_is_left_alone() {
    let test = test_db().await;
    let session = provision(&test.db, "agt_x", AgentStatus::Active).await;
    enqueue_message(&test.db, "agt_x", "long task", 0).await;
    let (item, run_id) = claim_and_start(&test, &session).await;
    assert!(test.db.mark_run_running(&run_id, 4242).await.expect("mark running"));
    assert!(test.db.heartbeat_run(&run_id).await.expect("heartbeat"));

    let report = test
        .db
        .reconcile_stalled_runs(&worker("worker-b"))
        .await
        .expect("reconcile as peer");
    assert!(report.is_noop());
    assert!(test.db.claim_next_item().await.expect("peer claim").is_none());

    complete(&test, &item, &run_id).await;
    let run = test.db.get_run(&run_id).await.expect("get run").expect("run exists");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.worker_id.map(|id| id.value().to_string()).as_deref(), Some("worker-a"));
    assert_eq!(work_item(&test.db, &item.id).await.status, WorkItemStatus::Done);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL or INBOX_TEST_DATABASE_URL"]
async fn given_stale_peer_run_when_taken_over_then_late_completion_leaves_the_new_run_alone() {
    let test = test_db().await;
    let session = provision(&test.db, "agt_x", AgentStatus::Active).await;
    enqueue_message(&test.db, "agt_x", "hello", 0).await;
    let (item, stale_run) = claim_and_start(&test, &session).await;
    backdate_in_flight(&test.db, 120).await;

    let report = test
        .db
        .reconcile_stalled_runs(&worker("worker-b"))
        .await
        .expect("reconcile as peer");
    assert_eq!(report.runs_failed, 1);
    assert_eq!(report.items_requeued, 1);

    let (retaken, new_run) = claim_and_start_as(&test, &session, &worker("worker-b")).await;
    assert_eq!(retaken.id, item.id);

    assert!(!test.db.heartbeat_run(&stale_run).await.expect("stale heartbeat"));
    complete(&test, &item, &stale_run).await;
    assert_eq!(work_item(&test.db, &item.id).await.status, WorkItemStatus::Processing);
    let stale = test.db.get_run(&stale_run).await.expect("get run").expect("run exists");
    assert_eq!(stale.status, RunStatus::Failed);

    test.db
        .fail_run(&failure(&item, &stale_run, "late failure"), &ItemDisposition::Fail)
        .await
        .expect("late fail");
    assert_eq!(work_item(&test.db, &item.id).await.status, WorkItemStatus::Processing);

    complete(&test, &retaken, &new_run).await;
    assert_eq!(work_item(&test.db, &item.id).await.status, WorkItemStatus::Done);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL or INBOX_TEST_DATABASE_URL"]
async fn given_claim_without_run_then_it_is_requeued_only_once_stale() {
    let test = test_db().await;
    provision(&test.db, "agt_y", AgentStatus::Active).await;
    let item_id = enqueue_message(&test.db, "agt_y", "claimed only", 0).await;
    assert!(test.db.claim_next_item().await.expect("claim").is_some());

    let fresh = test
        .db
        .reconcile_stalled_runs(&worker("worker-b"))
        .await
        .expect("reconcile fresh claim");
    assert!(fresh.is_noop());
    assert_eq!(work_item(&test.db, &item_id).await.status, WorkItemStatus::Processing);

    backdate_in_flight(&test.db, 120).await;
    let stale = test
        .db
        .reconcile_stalled_runs(&worker("worker-b"))
        .await
        .expect("reconcile stale claim");
    assert_eq!(stale.runs_failed, 0);
    assert_eq!(stale.items_requeued, 1);
    assert_eq!(work_item(&test.db, &item_id).await.status, WorkItemStatus::Queued);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL or INBOX_TEST_DATABASE_URL"]
async fn given_many_events_then_pages_walk_backwards_and_polling_walks_forwards() {
    let test = test_db().await;
    provision(&test.db, "agt_x", AgentStatus::Active).await;
    let agent = AgentId::new("agt_x");

    let mut ids = Vec::new();
    for n in 0..5 {
        let id = test
            .db
            .append_event(&NewAgentEvent {
                agent_id: agent.clone(),
                event_type: AgentEventType::Info,
                content: Some(format!("event {n}")),
                metadata: json!({"n": n}),
            })
            .await
            .expect("append event");
        ids.push(id);
    }

    let newest = test.db.list_events(&agent, None, 2).await.expect("page 1");
    assert_eq!(newest.iter().map(|e| e.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);

    let older = test
        .db
        .list_events(&agent, Some(ids[3]), 2)
        .await
        .expect("page 2");
    assert_eq!(older.iter().map(|e| e.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);

    let newer = test.db.events_after(&agent, ids[2], 10).await.expect("poll");
    assert_eq!(newer.iter().map(|e| e.id).collect::<Vec<_>>(), vec![ids[3], ids[4]]);
    assert_eq!(newer[1].metadata["n"], 4);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL or INBOX_TEST_DATABASE_URL"]
async fn given_existing_agent_when_provisioned_again_then_conflict() {
    let test = test_db().await;
    provision(&test.db, "agt_x", AgentStatus::Active).await;

    let again = test
        .db
        .provision_agent(&AgentId::new("agt_x"), "Again", std::path::Path::new("/tmp"))
        .await;
    assert!(matches!(again, Err(InboxError::AgentError(_))));

    let session = test
        .db
        .get_or_create_session(&AgentId::new("agt_x"))
        .await
        .expect("session");
    assert_eq!(session.agent_id, AgentId::new("agt_x"));
}
