use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn run(&self, args: &[&str]) -> Output {
        let config = self.path().join("config.toml");
        let store = self.path().join("executions.json");
        Command::new(env!("CARGO_BIN_EXE_tideline"))
            .arg("--config")
            .arg(&config)
            .arg("--store")
            .arg(&store)
            .args(args)
            .env("HOME", self.path())
            .env("RUST_LOG", "off")
            .output()
            .expect("failed to run tideline")
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "tideline {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).to_string()
    }

    fn run_json(&self, args: &[&str]) -> serde_json::Value {
        serde_json::from_str(&self.run_ok(args)).expect("stdout is JSON")
    }
}

#[test]
fn test_help_lists_lifecycle_commands() {
    let workspace = Workspace::new();
    let help = workspace.run_ok(&["--help"]);
    for command in ["start", "complete", "terminate", "describe", "list", "config"] {
        assert!(help.contains(command), "help is missing {}", command);
    }
}

#[test]
fn test_start_then_describe() {
    let workspace = Workspace::new();
    let started = workspace.run_json(&["start", "order-42", "--input", r#"{"sku": 7}"#, "--json"]);
    assert_eq!(started["started"], true);
    let run_id = started["run_id"].as_str().unwrap().to_string();

    let described = workspace.run_json(&["describe", "order-42", "--json"]);
    assert_eq!(described["identity"]["run_id"], run_id.as_str());
    assert_eq!(described["state"], "created");
    assert_eq!(described["status"], "running");
    assert_eq!(
        described["history"][0]["event_type"],
        "workflow_execution_started"
    );
}

#[test]
fn test_repeated_request_id_returns_same_run() {
    let workspace = Workspace::new();
    let first = workspace.run_json(&["start", "order-42", "--request-id", "req-1", "--json"]);
    let second = workspace.run_json(&["start", "order-42", "--request-id", "req-1", "--json"]);

    assert_eq!(first["run_id"], second["run_id"]);
    assert_eq!(second["started"], false);
}

#[test]
fn test_running_workflow_rejects_duplicate_start() {
    let workspace = Workspace::new();
    workspace.run_ok(&["start", "order-42"]);

    let output = workspace.run(&["start", "order-42"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("already running"), "stderr: {}", stderr);
}

#[test]
fn test_terminate_if_running_replaces_current_run() {
    let workspace = Workspace::new();
    let first = workspace.run_json(&["start", "order-42", "--json"]);
    let second = workspace.run_json(&[
        "start",
        "order-42",
        "--policy",
        "terminate-if-running",
        "--json",
    ]);
    assert_ne!(first["run_id"], second["run_id"]);

    let old_run_id = first["run_id"].as_str().unwrap();
    let old = workspace.run_json(&["describe", "order-42", "--run-id", old_run_id, "--json"]);
    assert_eq!(old["status"], "terminated");
    assert_eq!(old["termination"]["identity"], "history-service");

    let runs = workspace.run_json(&["list", "order-42", "--json"]);
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 2);
    let current: Vec<_> = runs.iter().filter(|run| run["current"] == true).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0]["run_id"], second["run_id"]);
}

#[test]
fn test_failed_only_policy_after_completion() {
    let workspace = Workspace::new();
    workspace.run_ok(&["start", "order-42"]);
    workspace.run_ok(&["complete", "order-42", "--status", "failed"]);
    workspace.run_ok(&["start", "order-42", "--policy", "allow-duplicate-failed-only"]);
    workspace.run_ok(&["complete", "order-42"]);

    let output = workspace.run(&["start", "order-42", "--policy", "allow-duplicate-failed-only"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("finished successfully"), "stderr: {}", stderr);
}

#[test]
fn test_terminate_closed_run_fails() {
    let workspace = Workspace::new();
    workspace.run_ok(&["start", "order-42"]);
    workspace.run_ok(&["terminate", "order-42", "--reason", "bad deploy"]);

    let described = workspace.run_json(&["describe", "order-42", "--json"]);
    assert_eq!(described["termination"]["reason"], "bad deploy");
    assert_eq!(described["termination"]["user_initiated"], true);

    let output = workspace.run(&["terminate", "order-42"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("already completed"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_input_json_is_rejected() {
    let workspace = Workspace::new();
    let output = workspace.run(&["start", "order-42", "--input", "{oops"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--input is not valid JSON"), "stderr: {}", stderr);
}

#[test]
fn test_describe_unknown_workflow_fails() {
    let workspace = Workspace::new();
    let output = workspace.run(&["describe", "missing"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
}

#[test]
fn test_config_init_writes_file() {
    let workspace = Workspace::new();
    workspace.run_ok(&["--namespace", "billing", "config", "--init"]);

    let content = std::fs::read_to_string(workspace.path().join("config.toml")).unwrap();
    assert!(content.contains("namespace = \"billing\""));
    assert!(content.contains("executions.json"));

    // later commands pick up the written namespace
    let started = workspace.run_json(&["start", "invoice-1", "--json"]);
    assert_eq!(started["namespace"], "billing");
}

#[test]
fn test_store_held_by_another_process_is_refused() {
    use fs2::FileExt;

    let workspace = Workspace::new();
    workspace.run_ok(&["start", "order-42"]);

    let holder = std::fs::File::open(workspace.path().join("executions.json.lock")).unwrap();
    holder.lock_exclusive().unwrap();

    let output = workspace.run(&["start", "order-43"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("in use by another process"), "stderr: {}", stderr);

    holder.unlock().unwrap();
    drop(holder);
    workspace.run_ok(&["start", "order-43"]);

    let runs: usize = ["order-42", "order-43"]
        .iter()
        .map(|id| workspace.run_json(&["list", id, "--json"]).as_array().unwrap().len())
        .sum();
    assert_eq!(runs, 2);
}
