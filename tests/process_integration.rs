//! Process lifecycle tests against real `/bin/sh` harness scripts.
#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use specloop::config::{HarnessKind, LoopConfig};
use specloop::process::{AgentProcess, HarnessProcess, IterationRequest, OutputLine};
use specloop::r#loop::{ExitReason, LoopManager};
use specloop::spec::{SpecTask, TaskSize, TaskStatus};
use specloop::testing::{assert_exit_reason, spec_markdown, RecordingSink};
use specloop::{LoopError, MarkdownSpecSource};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const RESULT_LINE: &str = r#"{"type":"result","subtype":"success","is_error":false,"total_cost_usd":0.02,"usage":{"input_tokens":5,"output_tokens":7}}"#;

fn sh(script: &str) -> HarnessProcess {
    HarnessProcess::new(HarnessKind::Command {
        program: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
    })
}

fn request(dir: &Path, idle: Duration) -> IterationRequest {
    IterationRequest {
        iteration: 1,
        prompt: "do the work".to_string(),
        working_dir: dir.to_path_buf(),
        model: "test".to_string(),
        idle_timeout: idle,
    }
}

async fn collect(
    process: &HarnessProcess,
    req: &IterationRequest,
    cancel: &CancellationToken,
) -> (Result<specloop::ProcessExit, LoopError>, Vec<String>) {
    let mut lines = Vec::new();
    let outcome = process
        .run_iteration(req, cancel, &mut |line: OutputLine<'_>| {
            if let OutputLine::Stdout(text) = line {
                lines.push(text.to_string());
            }
        })
        .await;
    (outcome, lines)
}

#[tokio::test]
async fn test_silent_process_hits_idle_timeout() {
    let dir = TempDir::new().unwrap();
    let process = sh("exec sleep 30");
    let started = Instant::now();

    let (outcome, _) = collect(
        &process,
        &request(dir.path(), Duration::from_millis(300)),
        &CancellationToken::new(),
    )
    .await;

    assert!(matches!(outcome, Err(LoopError::IdleTimeout { .. })));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_output_resets_idle_timer() {
    let dir = TempDir::new().unwrap();
    // total runtime exceeds the idle window, but no single gap does
    let script = format!("for i in 1 2 3 4 5; do echo tick; sleep 0.2; done; echo '{RESULT_LINE}'");
    let process = sh(&script);

    let (outcome, lines) = collect(
        &process,
        &request(dir.path(), Duration::from_millis(800)),
        &CancellationToken::new(),
    )
    .await;

    let exit = outcome.expect("chatty process must not time out");
    assert!(exit.success());
    assert_eq!(lines.len(), 6);
}

#[tokio::test]
async fn test_partial_line_output_resets_idle_timer() {
    let dir = TempDir::new().unwrap();
    // one long line trickles out in pieces; no gap reaches the idle window
    // but the whole line takes several windows to arrive
    let script = "for i in 1 2 3 4 5 6 7 8; do printf x; sleep 0.3; done; echo; echo done";
    let process = sh(script);

    let (outcome, lines) = collect(
        &process,
        &request(dir.path(), Duration::from_secs(1)),
        &CancellationToken::new(),
    )
    .await;

    let exit = outcome.expect("trickling output must not time out");
    assert!(exit.success());
    assert_eq!(lines, vec!["xxxxxxxx", "done"]);
}

#[tokio::test]
async fn test_unterminated_final_line_is_delivered() {
    let dir = TempDir::new().unwrap();
    let process = sh(&format!("printf '%s' '{RESULT_LINE}'"));

    let (outcome, lines) = collect(
        &process,
        &request(dir.path(), Duration::from_secs(5)),
        &CancellationToken::new(),
    )
    .await;

    assert!(outcome.unwrap().success());
    assert_eq!(lines, vec![RESULT_LINE]);
}

#[tokio::test]
async fn test_prompt_arrives_on_stdin() {
    let dir = TempDir::new().unwrap();
    let process = sh("line=$(cat); echo \"got: $line\"");

    let (outcome, lines) = collect(
        &process,
        &request(dir.path(), Duration::from_secs(5)),
        &CancellationToken::new(),
    )
    .await;

    assert!(outcome.unwrap().success());
    assert_eq!(lines, vec!["got: do the work"]);
}

#[tokio::test]
async fn test_exit_code_is_reported() {
    let dir = TempDir::new().unwrap();
    let process = sh("exit 7");

    let (outcome, _) = collect(
        &process,
        &request(dir.path(), Duration::from_secs(5)),
        &CancellationToken::new(),
    )
    .await;

    let exit = outcome.unwrap();
    assert_eq!(exit.code, Some(7));
    assert_eq!(exit.signal, None);
    assert!(exit.pid.is_some());
}

#[tokio::test]
async fn test_killed_by_signal_is_reported() {
    let dir = TempDir::new().unwrap();
    let process = sh("kill -9 $$");

    let (outcome, _) = collect(
        &process,
        &request(dir.path(), Duration::from_secs(5)),
        &CancellationToken::new(),
    )
    .await;

    let exit = outcome.unwrap();
    assert_eq!(exit.signal, Some(9));
    assert!(!exit.success());
}

#[tokio::test]
async fn test_missing_program_is_not_found() {
    let dir = TempDir::new().unwrap();
    let process = HarnessProcess::new(HarnessKind::Command {
        program: "specloop-no-such-assistant".to_string(),
        args: Vec::new(),
    });

    let (outcome, _) = collect(
        &process,
        &request(dir.path(), Duration::from_secs(5)),
        &CancellationToken::new(),
    )
    .await;

    assert!(matches!(outcome, Err(LoopError::HarnessNotFound { .. })));
}

#[tokio::test]
async fn test_cancellation_kills_child() {
    let dir = TempDir::new().unwrap();
    let process = sh("echo started; exec sleep 30");
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let (outcome, lines) = collect(&process, &request(dir.path(), Duration::from_secs(60)), &cancel).await;

    assert!(matches!(outcome, Err(LoopError::Cancelled)));
    assert_eq!(lines, vec!["started"]);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_exit_without_result_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let spec_path = dir.path().join("SPEC.md");
    std::fs::write(
        &spec_path,
        spec_markdown(&[SpecTask::new("T1", "Write the parser", TaskSize::Small)]),
    )
    .unwrap();

    let sink = RecordingSink::new();
    let mut manager = LoopManager::new(
        LoopConfig::new(dir.path())
            .with_spec_path(&spec_path)
            .with_idle_timeout(Duration::from_secs(10)),
        Arc::new(sh("cat > /dev/null; echo 'not json'; echo oops >&2; exit 1")),
        Arc::new(MarkdownSpecSource::new(&spec_path)),
        Box::new(sink.clone()),
        CancellationToken::new(),
    );

    let result = manager.run().await.unwrap();

    assert_exit_reason(&result, ExitReason::Error);
    let failure = result.iterations[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, specloop::FailureKind::NoResult);
    assert_eq!(sink.count("run_failed"), 1);
}

#[tokio::test]
async fn test_loop_drives_real_process_to_completion() {
    let dir = TempDir::new().unwrap();
    let spec_path = dir.path().join("SPEC.md");
    let task = SpecTask::new("T1", "Write the parser", TaskSize::Small);
    std::fs::write(&spec_path, spec_markdown(std::slice::from_ref(&task))).unwrap();
    std::fs::write(
        dir.path().join("done.md"),
        spec_markdown(&[task.with_status(TaskStatus::Passed)]),
    )
    .unwrap();

    // the "assistant" marks the task passed and reports a result
    let script = format!("cat > /dev/null; cp done.md SPEC.md; echo '{RESULT_LINE}'");
    let sink = RecordingSink::new();
    let mut manager = LoopManager::new(
        LoopConfig::new(dir.path())
            .with_spec_path(&spec_path)
            .with_idle_timeout(Duration::from_secs(10)),
        Arc::new(sh(&script)),
        Arc::new(MarkdownSpecSource::new(&spec_path)),
        Box::new(sink.clone()),
        CancellationToken::new(),
    );

    let result = manager.run().await.unwrap();

    assert_exit_reason(&result, ExitReason::Complete);
    assert_eq!(result.iterations.len(), 1);
    assert_eq!(result.iterations[0].completed_tasks, vec!["T1"]);
    assert_eq!(result.total_usage.total(), 12);
    assert_eq!(sink.count("task_completed"), 1);
}
