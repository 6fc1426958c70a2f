use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_cli_help() {
    let mut cmd = cargo_bin_cmd!("agent-dispatch");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Delegate coding tasks to coding-agent CLIs",
        ))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("backends"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_cli_version() {
    let mut cmd = cargo_bin_cmd!("agent-dispatch");
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("agent-dispatch"));
}

#[test]
fn test_cli_plan_help() {
    let mut cmd = cargo_bin_cmd!("agent-dispatch");
    cmd.args(["plan", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--parallel"))
        .stdout(predicate::str::contains("--fanout"))
        .stdout(predicate::str::contains("--backend"));
}

#[test]
fn test_fanout_requires_parallel() {
    let mut cmd = cargo_bin_cmd!("agent-dispatch");
    cmd.args(["plan", "plan.json", "--fanout", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--parallel"));
}

#[test]
fn test_backends_json() {
    let dir = TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("agent-dispatch");
    cmd.current_dir(dir.path())
        .env_remove("AGENT_DISPATCH_BACKEND")
        .args(["backends", "--output", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"aider\""))
        .stdout(predicate::str::contains("\"name\": \"opencode\""))
        .stdout(predicate::str::contains("context_file_soft_limit"));
}

#[test]
fn test_config_path_and_init() {
    let dir = TempDir::new().unwrap();

    let mut cmd = cargo_bin_cmd!("agent-dispatch");
    cmd.current_dir(dir.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(".agent-dispatch"));

    let mut cmd = cargo_bin_cmd!("agent-dispatch");
    cmd.current_dir(dir.path())
        .args(["config", "init"])
        .assert()
        .success();
    assert!(dir.path().join(".agent-dispatch/config.toml").exists());

    let mut cmd = cargo_bin_cmd!("agent-dispatch");
    cmd.current_dir(dir.path())
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn test_config_show_masks_key() {
    let dir = TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("agent-dispatch");
    cmd.current_dir(dir.path())
        .env("AGENT_DISPATCH_API_KEY", "sk-secret-value")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("***"))
        .stdout(predicate::str::contains("sk-secret-value").not());
}

#[test]
fn test_run_without_credentials_fails_before_spawning() {
    let dir = TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("agent-dispatch");
    cmd.current_dir(dir.path())
        .env_remove("AGENT_DISPATCH_API_KEY")
        .env_remove("OPENROUTER_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .args(["run", "add a test", "--backend", "aider"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing credential"));
}

#[test]
fn test_unknown_backend() {
    let dir = TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("agent-dispatch");
    cmd.current_dir(dir.path())
        .args(["run", "task", "--backend", "cursor"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown backend: cursor"));
}
