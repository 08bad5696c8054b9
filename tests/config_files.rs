use std::path::Path;

use serde_json::json;
use tempfile::TempDir;

use sandflow::config::{parse_config, parse_config_str};
use sandflow::errors::SandflowError;
use sandflow::{PipelineExecutor, Registry, RunPhase, RunRequest, SourceDescriptor, StepState};

fn write_config(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("pipeline.yaml");
    std::fs::write(&path, text).unwrap();
    path
}

fn project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "todo\n").unwrap();
    dir
}

#[tokio::test]
async fn test_file_pipeline_runs_commands_and_tools() {
    let work = tempfile::tempdir().unwrap();
    let source = project();
    let path = write_config(
        work.path(),
        &format!(
            r#"
name: inventory
max_retries: 0
sandbox:
  base_path: {base}
continue_when: {{ kind: stop-on-failure }}
security: {{}}
steps:
  - name: count
    command: "ls src | wc -l"
  - name: manifest
    tool: workspace-manifest
    config: {{ pattern: "*.rs" }}
"#,
            base = work.path().join("sandboxes").display()
        ),
    );

    let file = parse_config(&path).await.unwrap();
    let pipeline = file.build(&Registry::with_builtins()).unwrap();
    let executor = PipelineExecutor::new(pipeline)
        .unwrap()
        .with_sandbox_config(file.sandbox.clone())
        .with_audit_dir(work.path().join("runs"));

    let report = executor
        .run_report(
            RunRequest::new(SourceDescriptor::Local(source.path().to_path_buf())).with_run_id("inv-1"),
        )
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    let count = report.results.get("count").unwrap();
    assert_eq!(count.state(), StepState::Completed);
    assert_eq!(count.output()["stdout"].as_str().unwrap().trim(), "1");

    let manifest = report.results.get("manifest").unwrap();
    let files = manifest.output()["files"].as_object().unwrap();
    assert_eq!(files.keys().collect::<Vec<_>>(), vec!["src/main.rs"]);
    assert_eq!(manifest.metric("file_count"), Some(1.0));

    let session: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(work.path().join("runs/inv-1/session.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(session["pipeline"], json!("inventory"));
    assert!(work.path().join("runs/inv-1/workflow.log").exists());
    assert!(work.path().join("runs/inv-1/steps/manifest.json").exists());

    // Every workspace is gone once the run is over.
    let leftovers = std::fs::read_dir(work.path().join("sandboxes")).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_failing_command_stops_file_pipeline() {
    let work = tempfile::tempdir().unwrap();
    let path = write_config(
        work.path(),
        &format!(
            "name: gate\nmax_retries: 0\nsandbox: {{ base_path: '{}' }}\n\
             continue_when: {{ kind: stop-on-failure }}\n\
             steps:\n  - name: check\n    command: 'echo nope >&2; exit 3'\n  - name: after\n    command: 'true'\n",
            work.path().join("sandboxes").display()
        ),
    );

    let file = parse_config(&path).await.unwrap();
    let executor = PipelineExecutor::new(file.build(&Registry::new()).unwrap())
        .unwrap()
        .with_sandbox_config(file.sandbox.clone());
    let report = executor.run_report(RunRequest::new(SourceDescriptor::Empty)).await.unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.stopped_after.as_deref(), Some("check"));
    let check = report.results.get("check").unwrap();
    assert_eq!(check.state(), StepState::Failed);
    assert!(check.error().unwrap().contains("status 3"));
    assert!(check.error().unwrap().contains("nope"));
    assert!(!report.results.contains("after"));
}

#[test]
fn test_destructive_command_rejected_before_parsing() {
    let err = parse_config_str("name: bad\nsteps:\n  - name: wipe\n    command: 'rm -rf / --no-preserve-root'\n")
        .unwrap_err();
    assert!(matches!(err, SandflowError::Config(_)));
}

#[test]
fn test_unknown_tool_reported_at_build() {
    let file = parse_config_str("name: p\nsteps:\n  - name: a\n    tool: summarize\n").unwrap();
    let err = file.build(&Registry::with_builtins()).unwrap_err();
    assert!(err.to_string().contains("summarize"));
}

#[tokio::test]
async fn test_oversized_config_rejected() {
    let work = tempfile::tempdir().unwrap();
    let mut text = String::from("name: big\nsteps:\n  - name: a\n    command: ls\n");
    text.push_str(&format!("# {}\n", "x".repeat(1_100_000)));
    let path = write_config(work.path(), &text);
    let err = parse_config(&path).await.unwrap_err();
    assert!(err.to_string().contains("1MB"));
}
