#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use super::{
    ExecutionRequest, HookFuture, ProcessSupervisor, StreamRecord, SupervisorConfig,
    SupervisorError, SupervisorHooks,
};
use crate::types::{AgentEventType, AgentId, RunId, SessionId};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingHooks {
    pids: Mutex<Vec<u32>>,
    records: Mutex<Vec<StreamRecord>>,
}

impl SupervisorHooks for RecordingHooks {
    fn on_spawned(&self, pid: u32) -> HookFuture<'_> {
        Box::pin(async move {
            self.pids.lock().await.push(pid);
        })
    }

    fn on_record(&self, record: StreamRecord) -> HookFuture<'_> {
        Box::pin(async move {
            self.records.lock().await.push(record);
        })
    }
}

fn write_script(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("agent.sh");
    std::fs::write(&path, format!("{body}\n")).unwrap();
    path
}

// The script is run through `sh` so that no freshly written file is exec'd
// directly (avoids ETXTBSY under parallel tests).
fn supervisor_for(script: &Path, max_run_time: Duration) -> ProcessSupervisor {
    ProcessSupervisor::new(SupervisorConfig {
        executable: "sh".to_string(),
        executable_args: vec![script.display().to_string()],
        max_run_time,
        termination_grace: Duration::from_millis(500),
        ..SupervisorConfig::default()
    })
}

fn request(workspace: &Path) -> ExecutionRequest {
    ExecutionRequest {
        run_id: RunId::new("run_test"),
        agent_id: AgentId::new("agt_test"),
        workspace: workspace.to_path_buf(),
        session_id: SessionId::new("sess-1"),
        message: "What's my best seller?".to_string(),
    }
}

#[tokio::test]
async fn given_stream_json_output_when_process_exits_zero_then_records_are_forwarded() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        &dir,
        r#"echo '{"type":"assistant","content":"The walnut mug."}'
echo 'warming up'
echo '{"type":"tool_use","tool":"Read"}'"#,
    );
    let hooks = RecordingHooks::default();

    let outcome = supervisor_for(&script, Duration::from_secs(10))
        .execute(&request(dir.path()), &hooks, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.records, 2);
    assert_eq!(hooks.pids.lock().await.len(), 1);
    let records = hooks.records.lock().await;
    let types: Vec<_> = records.iter().map(|r| r.event_type).collect();
    assert_eq!(types, vec![AgentEventType::Response, AgentEventType::ToolUse]);
    assert_eq!(records[0].content.as_deref(), Some("The walnut mug."));
}

#[tokio::test]
async fn given_request_when_spawned_then_workspace_session_and_message_are_passed() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        &dir,
        r#"printf '{"type":"info","argc":%d,"second":"%s","fourth":"%s","sixth":"%s"}\n' "$#" "$2" "$4" "$6""#,
    );
    let hooks = RecordingHooks::default();

    supervisor_for(&script, Duration::from_secs(10))
        .execute(&request(dir.path()), &hooks, &CancellationToken::new())
        .await
        .unwrap();

    let records = hooks.records.lock().await;
    let raw = &records[0].raw;
    assert_eq!(raw["argc"], 8);
    assert_eq!(raw["second"], dir.path().display().to_string());
    assert_eq!(raw["fourth"], "sess-1");
    assert_eq!(raw["sixth"], "What's my best seller?");
}

#[tokio::test]
async fn given_non_zero_exit_when_executed_then_stderr_excerpt_is_reported() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "echo 'session expired' >&2\nexit 3");

    let error = supervisor_for(&script, Duration::from_secs(10))
        .execute(
            &request(dir.path()),
            &RecordingHooks::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match error {
        SupervisorError::NonZeroExit { code, ref stderr } => {
            assert_eq!(code, 3);
            assert!(stderr.contains("session expired"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(error.is_retryable());
}

#[tokio::test]
async fn given_process_killed_by_signal_when_executed_then_signal_is_named() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "kill -TERM $$\nsleep 5");

    let error = supervisor_for(&script, Duration::from_secs(10))
        .execute(
            &request(dir.path()),
            &RecordingHooks::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(error.signal(), Some("SIGTERM"));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn given_missing_executable_when_executed_then_error_is_not_retryable() {
    let dir = TempDir::new().unwrap();
    let supervisor = ProcessSupervisor::new(SupervisorConfig {
        executable: "inbox-test-no-such-executable".to_string(),
        ..SupervisorConfig::default()
    });

    let error = supervisor
        .execute(
            &request(dir.path()),
            &RecordingHooks::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(error, SupervisorError::ExecutableNotFound { .. }));
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn given_long_running_process_when_deadline_passes_then_it_is_terminated() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "exec sleep 30");
    let started = Instant::now();

    let error = supervisor_for(&script, Duration::from_millis(200))
        .execute(
            &request(dir.path()),
            &RecordingHooks::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(error, SupervisorError::TimedOut { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn given_process_ignoring_sigterm_when_grace_expires_then_it_is_killed() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "trap '' TERM\nwhile true; do sleep 0.1; done");
    let started = Instant::now();

    let error = supervisor_for(&script, Duration::from_millis(200))
        .execute(
            &request(dir.path()),
            &RecordingHooks::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(error, SupervisorError::TimedOut { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn given_cancellation_when_process_is_running_then_it_stops_immediately() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "exec sleep 30");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    let started = Instant::now();

    let error = supervisor_for(&script, Duration::from_secs(60))
        .execute(&request(dir.path()), &RecordingHooks::default(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(error, SupervisorError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn given_output_over_cap_when_executed_then_run_still_succeeds() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        &dir,
        r#"i=0
while [ $i -lt 200 ]; do echo '{"type":"info","n":1}'; i=$((i+1)); done"#,
    );
    let supervisor = ProcessSupervisor::new(SupervisorConfig {
        executable: "sh".to_string(),
        executable_args: vec![script.display().to_string()],
        output_cap_bytes: 256,
        ..SupervisorConfig::default()
    });

    let outcome = supervisor
        .execute(
            &request(dir.path()),
            &RecordingHooks::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.stdout_truncated);
    assert_eq!(outcome.records, 200);
}
