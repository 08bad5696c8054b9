use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use sandflow::errors::SandflowError;
use sandflow::sandbox::{
    CommandOutput, FilesystemSandboxFactory, SecurityPolicy, POLICY_FILE_NAME,
};
use sandflow::{
    derive_key, AgentStep, CommandStep, MemoryCache, PipelineConfig, PipelineExecutor, RunPhase, RunRequest,
    Sandbox, SandboxConfig, SandboxFactory, ShouldContinue, SourceDescriptor, StepResult, StepState,
};

/// Wraps the filesystem sandbox and counts setups and teardowns. Remote
/// sources are served from a local fixture instead of being cloned.
struct TrackingSandbox {
    inner: Arc<dyn Sandbox>,
    remote_fixture: Option<PathBuf>,
    setups: Arc<AtomicUsize>,
    teardowns: Arc<AtomicUsize>,
}

#[async_trait]
impl Sandbox for TrackingSandbox {
    async fn setup(&self, source: &SourceDescriptor) -> Result<PathBuf, SandflowError> {
        let source = match (source, &self.remote_fixture) {
            (SourceDescriptor::Remote { .. }, Some(fixture)) => SourceDescriptor::Local(fixture.clone()),
            _ => source.clone(),
        };
        let path = self.inner.setup(&source).await?;
        self.setups.fetch_add(1, Ordering::SeqCst);
        Ok(path)
    }

    async fn teardown(&self, path: &Path) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        self.inner.teardown(path).await
    }

    fn current_path(&self) -> Option<PathBuf> {
        self.inner.current_path()
    }

    async fn file_hash(&self, path: &str) -> Result<String, SandflowError> {
        self.inner.file_hash(path).await
    }

    async fn execute(&self, command: &str, timeout: Option<Duration>) -> Result<CommandOutput, SandflowError> {
        self.inner.execute(command, timeout).await
    }

    async fn read_file(&self, path: &str) -> Result<String, SandflowError> {
        self.inner.read_file(path).await
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandflowError> {
        self.inner.write_file(path, content).await
    }

    async fn list_files(&self, pattern: &str) -> Result<Vec<String>, SandflowError> {
        self.inner.list_files(pattern).await
    }
}

struct TrackingFactory {
    inner: FilesystemSandboxFactory,
    remote_fixture: Option<PathBuf>,
    setups: Arc<AtomicUsize>,
    teardowns: Arc<AtomicUsize>,
}

impl TrackingFactory {
    fn new(base: &Path) -> Self {
        Self {
            inner: FilesystemSandboxFactory::new(SandboxConfig::default().with_base_path(base)),
            remote_fixture: None,
            setups: Arc::new(AtomicUsize::new(0)),
            teardowns: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn serving_remote_from(mut self, fixture: &Path) -> Self {
        self.remote_fixture = Some(fixture.to_path_buf());
        self
    }
}

impl SandboxFactory for TrackingFactory {
    fn create(&self) -> Arc<dyn Sandbox> {
        Arc::new(TrackingSandbox {
            inner: self.inner.create(),
            remote_fixture: self.remote_fixture.clone(),
            setups: self.setups.clone(),
            teardowns: self.teardowns.clone(),
        })
    }
}

struct Harness {
    _base: TempDir,
    setups: Arc<AtomicUsize>,
    teardowns: Arc<AtomicUsize>,
    executor: PipelineExecutor,
}

fn harness(config: PipelineConfig) -> Harness {
    harness_with(config, None)
}

fn harness_with(config: PipelineConfig, remote_fixture: Option<&Path>) -> Harness {
    let base = tempfile::tempdir().unwrap();
    let mut factory = TrackingFactory::new(base.path());
    if let Some(fixture) = remote_fixture {
        factory = factory.serving_remote_from(fixture);
    }
    let setups = factory.setups.clone();
    let teardowns = factory.teardowns.clone();
    let executor = PipelineExecutor::new(config)
        .unwrap()
        .with_sandbox_factory(Arc::new(factory));
    Harness { _base: base, setups, teardowns, executor }
}

fn fixture_repo() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();
    std::fs::write(dir.path().join("src/lib.rs"), "pub fn answer() -> u32 { 42 }\n").unwrap();
    dir
}

#[tokio::test]
async fn test_steps_run_in_order_and_see_earlier_results() {
    let order = Arc::new(Mutex::new(Vec::new()));

    let step = |name: &'static str, order: Arc<Mutex<Vec<String>>>| {
        AgentStep::from_fn(name, move |_, ctx| {
            let order = order.clone();
            async move {
                let seen: Vec<String> = ctx.previous_results.names().map(String::from).collect();
                order.lock().unwrap().push(name.to_string());
                Ok(StepResult::completed(json!({ "step": name, "seen": seen })))
            }
        })
    };

    let config = PipelineConfig::new(
        "ordered",
        vec![step("a", order.clone()), step("b", order.clone()), step("c", order.clone())],
    );
    let h = harness(config);
    let results = h.executor.run(SourceDescriptor::Empty).await.unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(results.names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    assert_eq!(results.get("a").unwrap().output()["seen"], json!([]));
    assert_eq!(results.get("c").unwrap().output()["seen"], json!(["a", "b"]));
    assert_eq!(h.setups.load(Ordering::SeqCst), 1);
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_on_failure_ends_run_early() {
    let third_ran = Arc::new(AtomicBool::new(false));
    let flag = third_ran.clone();

    let config = PipelineConfig::new(
        "early-stop",
        vec![
            AgentStep::from_fn("a", |_, _| async { Ok(StepResult::completed(json!(1))) }),
            AgentStep::from_fn("b", |_, _| async { Ok(StepResult::failed("lint errors")) }),
            AgentStep::from_fn("c", move |_, _| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(StepResult::completed(json!(3)))
                }
            }),
        ],
    )
    .with_continue_when(ShouldContinue::StopOnFailure);

    let h = harness(config);
    let report = h.executor.run_report(RunRequest::new(SourceDescriptor::Empty)).await.unwrap();

    assert!(!third_ran.load(Ordering::SeqCst));
    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.stopped_after.as_deref(), Some("b"));
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results.get("b").unwrap().error(), Some("lint errors"));
    assert!(!report.results.contains("c"));
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_threshold_condition_stops_on_metric() {
    let config = PipelineConfig::new(
        "coverage",
        vec![
            AgentStep::from_fn("measure", |_, _| async {
                Ok(StepResult::completed(json!(null)).with_metric("coverage", 0.4))
            }),
            AgentStep::from_fn("publish", |_, _| async { Ok(StepResult::completed(json!(null))) }),
        ],
    )
    .with_continue_when(ShouldContinue::threshold("coverage", sandflow::Comparison::Ge, 0.8));

    let h = harness(config);
    let results = h.executor.run(SourceDescriptor::Empty).await.unwrap();
    assert_eq!(results.names().collect::<Vec<_>>(), vec!["measure"]);
}

#[tokio::test]
async fn test_workspace_removed_after_step_error() {
    let workspace = Arc::new(Mutex::new(None::<PathBuf>));
    let seen = workspace.clone();

    let config = PipelineConfig::new(
        "cleanup",
        vec![AgentStep::from_fn("boom", move |_, ctx| {
            let seen = seen.clone();
            async move {
                *seen.lock().unwrap() = Some(ctx.sandbox_path.clone());
                Err(SandflowError::StepExecution("tool crashed".into()))
            }
        })],
    )
    .with_retries(0, Duration::ZERO);

    let h = harness(config);
    let results = h.executor.run(SourceDescriptor::Empty).await.unwrap();

    let result = results.get("boom").unwrap();
    assert_eq!(result.state(), StepState::Failed);
    assert!(result.error().unwrap().contains("tool crashed"));

    let path = workspace.lock().unwrap().clone().unwrap();
    assert!(!path.exists());
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invariant_violation_propagates_after_teardown() {
    let config = PipelineConfig::new(
        "invariant",
        vec![AgentStep::from_fn("broken", |_, _| async {
            Err(SandflowError::Internal("result store corrupted".into()))
        })],
    );

    let h = harness(config);
    let err = h.executor.run(SourceDescriptor::Empty).await.unwrap_err();
    assert!(matches!(err, SandflowError::Internal(_)));
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panicking_predicate_is_internal_error_and_tears_down() {
    let config = PipelineConfig::new(
        "predicate-panic",
        vec![
            AgentStep::from_fn("a", |_, _| async { Ok(StepResult::completed(json!(null))) }),
            AgentStep::from_fn("b", |_, _| async { Ok(StepResult::completed(json!(null))) }),
        ],
    )
    .with_continue_when(ShouldContinue::custom(|_| panic!("predicate bug")));

    let h = harness(config);
    let err = h.executor.run(SourceDescriptor::Empty).await.unwrap_err();
    match err {
        SandflowError::Internal(msg) => assert!(msg.contains("predicate bug")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.setups.load(Ordering::SeqCst), 1);
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_setup_failure_runs_no_steps() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let config = PipelineConfig::new(
        "no-source",
        vec![AgentStep::from_fn("a", move |_, _| {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(StepResult::completed(json!(null)))
            }
        })],
    );

    let h = harness(config);
    let missing = SourceDescriptor::Local(PathBuf::from("/definitely/not/here/sandflow"));
    let err = h.executor.run(missing).await.unwrap_err();

    assert!(matches!(err, SandflowError::SandboxSetup(_)));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(h.setups.load(Ordering::SeqCst), 0);
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_remote_descriptor_clone_then_analyze() {
    let fixture = fixture_repo();
    let source: SourceDescriptor =
        serde_json::from_value(json!({ "repoUrl": "https://example.com/acme/demo.git" })).unwrap();
    assert!(source.is_remote());

    let clone = AgentStep::from_fn("clone", |sandbox, _| async move {
        let files = sandbox.list_files("**/*").await?;
        Ok(StepResult::completed(json!({ "files": files })))
    });
    let analyze = AgentStep::from_fn("analyze", |sandbox, ctx| async move {
        let files = ctx
            .previous("clone")
            .map(|r| r.output()["files"].clone())
            .unwrap_or(Value::Null);
        let digest = sandbox.file_hash("src/lib.rs").await?;
        let source = sandbox.read_file("src/lib.rs").await?;
        Ok(StepResult::completed(json!({ "files": files, "lib_hash": digest }))
            .with_metric("lines", source.lines().count() as f64))
    });

    let h = harness_with(PipelineConfig::new("analysis", vec![clone, analyze]), Some(fixture.path()));
    let report = h.executor.run_report(RunRequest::new(source)).await.unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    let analyzed = report.results.get("analyze").unwrap();
    assert_eq!(analyzed.output()["files"], json!(["README.md", "src/lib.rs"]));
    assert_eq!(
        analyzed.output()["lib_hash"],
        json!(sandflow::hashing::hash_bytes(b"pub fn answer() -> u32 { 42 }\n"))
    );
    assert_eq!(analyzed.metric("lines"), Some(1.0));
    assert_eq!(report.summary.completed, 2);
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 1);
    // The source tree itself is untouched.
    assert!(fixture.path().join("src/lib.rs").exists());
}

#[tokio::test]
async fn test_remote_clone_then_failing_analyze_tears_down() {
    let fixture = fixture_repo();
    let workspace = Arc::new(Mutex::new(None::<PathBuf>));
    let seen = workspace.clone();

    let clone = AgentStep::from_fn("clone", move |sandbox, ctx| {
        let seen = seen.clone();
        async move {
            *seen.lock().unwrap() = Some(ctx.sandbox_path.clone());
            let readme = sandbox.read_file("README.md").await?;
            Ok(StepResult::completed(json!({ "readme": readme })))
        }
    });
    let analyze = AgentStep::from_fn("analyze", |_, _| async {
        Ok(StepResult::failed("analysis found 3 unsafe blocks"))
    });

    let h = harness_with(PipelineConfig::new("analysis", vec![clone, analyze]), Some(fixture.path()));
    let source = SourceDescriptor::Remote { url: "https://example.com/acme/demo.git".into(), git_ref: None };
    let report = h.executor.run_report(RunRequest::new(source)).await.unwrap();

    assert_eq!(report.results.names().collect::<Vec<_>>(), vec!["clone", "analyze"]);
    assert_eq!(report.results.get("clone").unwrap().state(), StepState::Completed);
    let analyzed = report.results.get("analyze").unwrap();
    assert_eq!(analyzed.state(), StepState::Failed);
    assert_eq!(analyzed.error(), Some("analysis found 3 unsafe blocks"));

    let path = workspace.lock().unwrap().clone().unwrap();
    assert!(!path.exists());
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_memoized_results_do_not_leak_between_sources() {
    let source_a = tempfile::tempdir().unwrap();
    let source_b = tempfile::tempdir().unwrap();
    std::fs::write(source_a.path().join("v.txt"), "from-A").unwrap();
    std::fs::write(source_b.path().join("v.txt"), "from-B").unwrap();

    let step = AgentStep::from_fn("read", |sandbox, _| async move {
        Ok(StepResult::completed(json!(sandbox.read_file("v.txt").await?)))
    });
    let h = harness(PipelineConfig::new("memo", vec![step]));
    let executor = h.executor.with_cache(Arc::new(MemoryCache::new()));

    let request = |dir: &Path| {
        RunRequest::new(SourceDescriptor::Local(dir.to_path_buf())).with_input(json!({ "task": "same" }))
    };
    let a = executor.run_report(request(source_a.path())).await.unwrap();
    let b = executor.run_report(request(source_b.path())).await.unwrap();

    assert_eq!(a.results.get("read").unwrap().output(), &json!("from-A"));
    assert_eq!(b.results.get("read").unwrap().output(), &json!("from-B"));
    assert_eq!(b.summary.cache_hits, 0);
}

#[tokio::test]
async fn test_command_step_runs_inside_workspace() {
    let fixture = fixture_repo();
    let mut env = std::collections::BTreeMap::new();
    env.insert("GREETING".to_string(), "it's here".to_string());
    let step = AgentStep::new(
        "show",
        Arc::new(CommandStep::new("head -n1 README.md && echo \"$GREETING\"").with_env(env)),
    );

    let h = harness(PipelineConfig::new("commands", vec![step]));
    let results = h
        .executor
        .run(SourceDescriptor::Local(fixture.path().to_path_buf()))
        .await
        .unwrap();

    let result = results.get("show").unwrap();
    assert!(result.is_completed());
    assert_eq!(result.output()["stdout"], json!("# demo\nit's here\n"));
    assert_eq!(result.metric("exit_code"), Some(0.0));
}

#[tokio::test]
async fn test_security_policy_written_before_first_step() {
    let step = AgentStep::from_fn("inspect", |sandbox, _| async move {
        let text = sandbox.read_file(POLICY_FILE_NAME).await?;
        let policy: Value = serde_json::from_str(&text)?;
        Ok(StepResult::completed(policy))
    });
    let config = PipelineConfig::new("policy", vec![step]).with_security_policy(SecurityPolicy::default());

    let h = harness(config);
    let results = h.executor.run(SourceDescriptor::Empty).await.unwrap();
    let policy = results.get("inspect").unwrap().output();
    assert_eq!(policy["sandbox"]["enabled"], json!(true));
    assert_eq!(policy["permissions"]["defaultMode"], json!("acceptEdits"));
}

#[tokio::test]
async fn test_run_many_respects_concurrency_bound() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (current, max) = (in_flight.clone(), peak.clone());

    let step = AgentStep::from_fn("work", move |_, _| {
        let (current, max) = (current.clone(), max.clone());
        async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            Ok(StepResult::completed(json!(null)))
        }
    });

    let h = harness(PipelineConfig::new("batch", vec![step]).with_concurrency(2));
    let requests = (0..5)
        .map(|i| RunRequest::new(SourceDescriptor::Empty).with_run_id(format!("run-{i}")))
        .collect();
    let outcomes = h.executor.run_many(requests).await;

    assert_eq!(outcomes.len(), 5);
    for (i, outcome) in outcomes.iter().enumerate() {
        let report = outcome.as_ref().unwrap();
        assert_eq!(report.run_id, format!("run-{i}"));
        assert_eq!(report.phase, RunPhase::Completed);
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(h.setups.load(Ordering::SeqCst), 5);
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 5);
}

#[test]
fn test_cache_keys_are_deterministic() {
    let config = json!({ "depth": 2, "lang": "rust" });
    let a = derive_key("analyze", "run-1", &json!({ "x": 1, "y": [1, 2] }), &config);
    let b = derive_key("analyze", "run-1", &json!({ "y": [1, 2], "x": 1 }), &config);
    assert_eq!(a, b);
    assert_ne!(a, derive_key("analyze", "run-2", &json!({ "x": 1, "y": [1, 2] }), &config));
    assert_eq!(derive_key("s", "r", &json!(3), &json!({})), derive_key("s", "r", &json!("3"), &json!({})));
}
