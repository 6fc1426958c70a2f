#![cfg(unix)]

mod fixtures;

use std::time::{Duration, Instant};

use agent_dispatch::execution::RUNNER_EXIT_CODE;
use agent_dispatch::runner::{ProcessRunner, RunStatus};
use agent_dispatch::strategy::CommandSpec;
use fixtures::scripted_strategy::ScriptedStrategy;

fn shell(script: &str) -> CommandSpec {
    CommandSpec::new(
        vec!["sh".into(), "-c".into(), script.into()],
        std::env::temp_dir(),
    )
    .with_metadata("backend", "scripted")
}

#[tokio::test]
async fn test_silent_process_is_killed_by_inactivity_timeout() {
    let runner = ProcessRunner::new(Duration::from_secs(20));
    let strategy = ScriptedStrategy::new("");
    let started = Instant::now();

    let result = runner
        .execute(&strategy, &shell("sleep 30"), Duration::from_secs(300))
        .await;

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(20), "killed too early: {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(25), "killed too late: {elapsed:?}");
    assert!(!result.success);
    assert_eq!(result.exit_code, RUNNER_EXIT_CODE);
    assert!(result.summary.contains("timed out"));
    assert!(result.notes.contains("activity"));
    assert!(!result.retryable);
}

#[tokio::test]
async fn test_chatty_process_is_killed_by_max_timeout() {
    let runner = ProcessRunner::new(Duration::from_secs(20));
    let strategy = ScriptedStrategy::new("");
    let started = Instant::now();

    let result = runner
        .execute(
            &strategy,
            &shell("while true; do echo tick; sleep 1; done"),
            Duration::from_secs(10),
        )
        .await;

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10), "killed too early: {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(16), "killed too late: {elapsed:?}");
    assert_eq!(result.exit_code, RUNNER_EXIT_CODE);
    assert!(result.summary.contains("timed out"));
    assert!(result.notes.contains("maximum timeout"));
    assert!(!result.notes.contains("activity"));
    assert!(result.stdout.contains("tick"));
}

#[tokio::test]
async fn test_periodic_output_on_either_stream_completes() {
    let runner = ProcessRunner::new(Duration::from_secs(20));
    let strategy = ScriptedStrategy::new("");
    let script = "i=0; while [ $i -lt 10 ]; do \
                  if [ $((i % 2)) -eq 0 ]; then echo \"chunk $i\"; else echo \"chunk $i\" >&2; fi; \
                  i=$((i + 1)); sleep 1; done";

    let result = runner
        .execute(&strategy, &shell(script), Duration::from_secs(300))
        .await;

    assert!(result.success, "unexpected failure: {}", result.summary);
    assert_eq!(result.exit_code, 0);
    assert!(result.stdout.contains("chunk 8"));
    assert!(result.stderr.contains("chunk 9"));
}

#[tokio::test]
async fn test_output_resets_inactivity_window() {
    // Total runtime exceeds the window; each gap does not.
    let runner = ProcessRunner::new(Duration::from_secs(2));
    let outcome = runner
        .run(
            &shell("for i in 1 2 3 4; do echo $i; sleep 1; done"),
            Duration::from_secs(30),
        )
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.elapsed >= Duration::from_secs(3));
}

#[tokio::test]
async fn test_spawn_failure_is_reported() {
    let runner = ProcessRunner::default();
    let strategy = ScriptedStrategy::new("");
    let spec = CommandSpec::new(
        vec!["/nonexistent/agent-cli".into(), "--help".into()],
        std::env::temp_dir(),
    )
    .with_metadata("backend", "scripted");

    let result = runner
        .execute(&strategy, &spec, Duration::from_secs(5))
        .await;

    assert!(!result.success);
    assert_eq!(result.exit_code, RUNNER_EXIT_CODE);
    assert!(result.summary.starts_with("Failed to start scripted"));
    assert!(!result.notes.is_empty());
}

#[tokio::test]
async fn test_nonzero_exit_is_classified_by_strategy() {
    let runner = ProcessRunner::default();
    let strategy = ScriptedStrategy::new("");

    let result = runner
        .execute(
            &strategy,
            &shell("echo 'Error: 503 Service Unavailable' >&2; exit 2"),
            Duration::from_secs(10),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.exit_code, 2);
    assert!(result.retryable);
}

#[tokio::test]
async fn test_exit_with_lingering_descendant_completes() {
    let runner = ProcessRunner::new(Duration::from_secs(2));
    let strategy = ScriptedStrategy::new("");
    let started = Instant::now();

    let result = runner
        .execute(
            &strategy,
            &shell("echo 'Applied edit to a.rs'; sleep 30 & exit 0"),
            Duration::from_secs(60),
        )
        .await;

    assert!(result.success, "unexpected failure: {}", result.summary);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.touched_files, vec!["a.rs"]);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_exit_code_survives_lingering_descendant() {
    let runner = ProcessRunner::new(Duration::from_secs(5));
    let outcome = runner
        .run(&shell("echo partial; sleep 30 & exit 4"), Duration::from_secs(60))
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.exit_code, 4);
    assert!(outcome.stdout.contains("partial"));
}
