use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use super::config::PipelineConfig;
use super::events::PipelineEvent;
use super::metrics::{compute_summary, RunSummary, StepRecord};
use super::phase::RunPhase;
use super::state::{StepContext, StepResult, StepResults};
use crate::audit::AuditSession;
use crate::cache::{derive_key, ResultCache};
use crate::errors::{with_retry, SandflowError};
use crate::sandbox::{
    write_policy, FilesystemSandboxFactory, Sandbox, SandboxConfig, SandboxFactory, SourceDescriptor,
};
use crate::step::AgentStep;

/// One pipeline run to perform.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source: SourceDescriptor,
    /// Handed to every step as `input_data`; defaults to the source
    /// descriptor itself.
    pub input: Option<Value>,
    pub run_id: Option<String>,
}

impl RunRequest {
    pub fn new(source: SourceDescriptor) -> Self {
        Self { source, input: None, run_id: None }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

impl From<SourceDescriptor> for RunRequest {
    fn from(source: SourceDescriptor) -> Self {
        Self::new(source)
    }
}

/// Everything known about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub pipeline: String,
    pub results: StepResults,
    pub steps: BTreeMap<String, StepRecord>,
    pub phase: RunPhase,
    /// Set when the continuation predicate ended the run with steps left.
    pub stopped_after: Option<String>,
    pub revision: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub summary: RunSummary,
}

struct LoopOutcome {
    results: StepResults,
    records: BTreeMap<String, StepRecord>,
    stopped_after: Option<String>,
    revision: Option<String>,
}

/// Runs a [`PipelineConfig`] against freshly materialized sandboxes.
///
/// Within a run steps execute strictly in order. Step faults (errors,
/// timeouts, panics) are recorded as failed results; only sandbox
/// acquisition failures and invariant violations are returned as `Err`.
/// The sandbox is torn down exactly once for every successful setup.
#[derive(Clone)]
pub struct PipelineExecutor {
    config: Arc<PipelineConfig>,
    sandbox_factory: Arc<dyn SandboxFactory>,
    cache: Option<Arc<dyn ResultCache>>,
    event_tx: Option<mpsc::UnboundedSender<PipelineEvent>>,
    audit_dir: Option<PathBuf>,
    annotate_skipped: bool,
}

impl PipelineExecutor {
    pub fn new(config: PipelineConfig) -> Result<Self, SandflowError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            sandbox_factory: Arc::new(FilesystemSandboxFactory::default()),
            cache: None,
            event_tx: None,
            audit_dir: None,
            annotate_skipped: false,
        })
    }

    pub fn with_sandbox_config(self, config: SandboxConfig) -> Self {
        self.with_sandbox_factory(Arc::new(FilesystemSandboxFactory::new(config)))
    }

    pub fn with_sandbox_factory(mut self, factory: Arc<dyn SandboxFactory>) -> Self {
        self.sandbox_factory = factory;
        self
    }

    /// Attach a result store. Only consulted while `cache_enabled` is set.
    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attach an event channel for streaming run progress to a consumer.
    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Write an audit trail for every run under `dir/<run_id>/`.
    pub fn with_audit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.audit_dir = Some(dir.into());
        self
    }

    /// After an early stop, record the steps that never ran as skipped.
    pub fn with_skipped_annotation(mut self, enabled: bool) -> Self {
        self.annotate_skipped = enabled;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    pub async fn run(&self, source: SourceDescriptor) -> Result<StepResults, SandflowError> {
        Ok(self.run_report(RunRequest::new(source)).await?.results)
    }

    pub async fn run_with_id(
        &self,
        source: SourceDescriptor,
        run_id: &str,
    ) -> Result<StepResults, SandflowError> {
        Ok(self
            .run_report(RunRequest::new(source).with_run_id(run_id))
            .await?
            .results)
    }

    /// Run independent pipelines with at most `concurrency` in flight.
    /// Outcomes are returned in request order.
    pub async fn run_many(&self, requests: Vec<RunRequest>) -> Vec<Result<RunReport, SandflowError>> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        info!(
            pipeline = %self.config.name,
            runs = requests.len(),
            concurrency = self.config.concurrency,
            "Starting batch"
        );

        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let executor = self.clone();
                let semaphore = semaphore.clone();
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| SandflowError::Internal(format!("Run limiter closed: {}", e)))?;
                    executor.run_report(request).await
                })
            })
            .collect();

        futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(SandflowError::Internal(format!("Run task failed: {}", e))),
            })
            .collect()
    }

    pub async fn run_report(&self, request: RunRequest) -> Result<RunReport, SandflowError> {
        let run_id = request
            .run_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let input = match request.input {
            Some(input) => input,
            None => serde_json::to_value(&request.source)?,
        };
        let started_at = Utc::now();
        let clock = Instant::now();

        info!(
            pipeline = %self.config.name,
            run_id = %run_id,
            source = %request.source,
            phase = %RunPhase::Initializing,
            "Run starting"
        );
        self.emit(PipelineEvent::RunStarted {
            run_id: run_id.clone(),
            pipeline: self.config.name.clone(),
            total_steps: self.config.steps.len(),
        });

        let sandbox = self.sandbox_factory.create();
        let workspace = match sandbox.setup(&request.source).await {
            Ok(path) => path,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Sandbox setup failed, no steps ran");
                self.emit(PipelineEvent::RunFailed { run_id, error: e.to_string() });
                return Err(e);
            }
        };
        self.emit(PipelineEvent::SandboxReady { run_id: run_id.clone(), path: workspace.clone() });

        let audit = self.open_audit(&run_id).await;

        let outcome = AssertUnwindSafe(self.execute_steps(
            &run_id,
            &input,
            sandbox.clone(),
            &workspace,
            audit.as_ref(),
        ))
        .catch_unwind()
        .await;

        sandbox.teardown(&workspace).await;

        let outcome = match outcome {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => return Err(self.abort(run_id, audit.as_ref(), e).await),
            Err(panic) => {
                let e = SandflowError::Internal(format!("Pipeline loop panicked: {}", panic_message(&panic)));
                return Err(self.abort(run_id, audit.as_ref(), e).await);
            }
        };

        let duration_ms = clock.elapsed().as_millis() as u64;
        let summary = compute_summary(self.config.steps.len(), &outcome.results, &outcome.records);

        if let Some(ref session) = audit {
            if let Err(e) = session.finish(RunPhase::Completed, summary.clone()).await {
                warn!(run_id = %run_id, error = %e, "Failed to finalize audit trail");
            }
        }

        info!(
            pipeline = %self.config.name,
            run_id = %run_id,
            phase = %RunPhase::Completed,
            stopped_after = ?outcome.stopped_after,
            completed = summary.completed,
            failed = summary.failed,
            duration_ms,
            "Run finished"
        );
        self.emit(PipelineEvent::RunFinished {
            run_id: run_id.clone(),
            phase: RunPhase::Completed,
            duration_ms,
        });

        Ok(RunReport {
            run_id,
            pipeline: self.config.name.clone(),
            results: outcome.results,
            steps: outcome.records,
            phase: RunPhase::Completed,
            stopped_after: outcome.stopped_after,
            revision: outcome.revision,
            started_at,
            duration_ms,
            summary,
        })
    }

    /// Terminal bookkeeping for a run whose loop faulted after the sandbox
    /// was acquired. The sandbox is already torn down.
    async fn abort(
        &self,
        run_id: String,
        audit: Option<&AuditSession>,
        e: SandflowError,
    ) -> SandflowError {
        error!(run_id = %run_id, phase = %RunPhase::Aborted, error = %e, "Run aborted");
        if let Some(session) = audit {
            let _ = session.log(&format!("Run failed: {}", e)).await;
            let summary = RunSummary { total_steps: self.config.steps.len(), ..Default::default() };
            if let Err(audit_err) = session.finish(RunPhase::Aborted, summary).await {
                warn!(run_id = %run_id, error = %audit_err, "Failed to finalize audit trail");
            }
        }
        self.emit(PipelineEvent::RunFailed { run_id, error: e.to_string() });
        e
    }

    async fn open_audit(&self, run_id: &str) -> Option<AuditSession> {
        let dir = self.audit_dir.as_ref()?;
        match AuditSession::initialize(dir, run_id, &self.config.name).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Audit trail disabled for this run");
                None
            }
        }
    }

    async fn execute_steps(
        &self,
        run_id: &str,
        input: &Value,
        sandbox: Arc<dyn Sandbox>,
        workspace: &Path,
        audit: Option<&AuditSession>,
    ) -> Result<LoopOutcome, SandflowError> {
        if let Some(ref policy) = self.config.security_policy {
            write_policy(workspace, policy).await.map_err(|e| {
                SandflowError::SandboxSetup(format!("Failed to write security policy: {}", e))
            })?;
        }

        let revision = crate::git::head_revision(workspace);
        let mut metadata = BTreeMap::new();
        metadata.insert("run_id".to_string(), json!(run_id));
        metadata.insert("pipeline".to_string(), json!(self.config.name));
        if let Some(ref rev) = revision {
            metadata.insert("revision".to_string(), json!(rev));
        }

        let cache_ttl = match (&self.cache, self.config.cache_enabled) {
            (Some(_), true) => Some(self.config.cache_ttl()?),
            _ => None,
        };

        let mut results = StepResults::new();
        let mut records = BTreeMap::new();
        let mut stopped_after = None;
        let total = self.config.steps.len();

        for (index, step) in self.config.steps.iter().enumerate() {
            info!(
                run_id = %run_id,
                step = %step.name,
                phase = %RunPhase::Executing(index),
                "Step starting"
            );
            self.emit(PipelineEvent::StepStarted {
                run_id: run_id.to_string(),
                step: step.name.clone(),
                index,
            });
            if let Some(session) = audit {
                if let Err(e) = session.start_step(&step.name, index).await {
                    warn!(step = %step.name, error = %e, "Audit write failed");
                }
            }

            let mut step_metadata = metadata.clone();
            step_metadata.insert("step".to_string(), json!(step.name));
            step_metadata.insert("config".to_string(), step.config.clone());
            let context = StepContext {
                sandbox_path: workspace.to_path_buf(),
                input_data: input.clone(),
                previous_results: results.clone(),
                metadata: step_metadata,
            };

            let (result, record) = self
                .run_step(run_id, step, sandbox.clone(), context, cache_ttl)
                .await?;

            info!(
                run_id = %run_id,
                step = %step.name,
                state = %result.state(),
                attempts = record.attempts,
                duration_ms = record.duration_ms,
                cached = record.cached,
                "Step finished"
            );
            self.emit(PipelineEvent::StepFinished {
                run_id: run_id.to_string(),
                step: step.name.clone(),
                state: result.state(),
                duration_ms: record.duration_ms,
                cached: record.cached,
            });
            if let Some(session) = audit {
                if let Err(e) = session.end_step(&step.name, &result, &record).await {
                    warn!(step = %step.name, error = %e, "Audit write failed");
                }
            }

            let proceed = self.config.continue_when.evaluate(&result);
            results.insert(step.name.clone(), result);
            records.insert(step.name.clone(), record);

            if !proceed {
                let remaining = &self.config.steps[index + 1..];
                if !remaining.is_empty() {
                    stopped_after = Some(step.name.clone());
                }
                info!(
                    run_id = %run_id,
                    after_step = %step.name,
                    remaining = remaining.len(),
                    "Continuation condition not met, stopping run"
                );
                self.emit(PipelineEvent::RunStopped {
                    run_id: run_id.to_string(),
                    after_step: step.name.clone(),
                });
                if self.annotate_skipped {
                    for skipped in remaining {
                        results.insert(skipped.name.clone(), StepResult::skipped());
                    }
                }
                break;
            }
        }

        debug!(run_id = %run_id, recorded = results.len(), total, "Step loop done");
        Ok(LoopOutcome { results, records, stopped_after, revision })
    }

    async fn run_step(
        &self,
        run_id: &str,
        step: &AgentStep,
        sandbox: Arc<dyn Sandbox>,
        context: StepContext,
        cache_ttl: Option<Duration>,
    ) -> Result<(StepResult, StepRecord), SandflowError> {
        let started = Instant::now();
        let key = derive_key(&step.name, run_id, &context.input_data, &step.config);

        if let (Some(cache), Some(_)) = (&self.cache, cache_ttl) {
            if let Some(hit) = cache.get(&key).await {
                debug!(step = %step.name, key = %key, "Cache hit");
                let record = StepRecord {
                    attempts: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                    cached: true,
                };
                return Ok((hit.with_metric("cache_hit", 1.0).with_cache_key(key), record));
            }
        }

        let timeout = self.config.step_timeout(step);
        let policy = self.config.retry_policy(step);
        let mut attempts = 0u32;

        let outcome = with_retry(&step.name, &policy, || {
            attempts += 1;
            invoke_once(step, sandbox.clone(), context.clone(), timeout)
        })
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(e) if e.is_invariant_violation() => return Err(e),
            Err(e) => {
                warn!(
                    step = %step.name,
                    attempts,
                    error_type = e.classify().error_type,
                    error = %e,
                    "Step fault recorded as failure"
                );
                StepResult::failed(e.to_string())
            }
        };
        let result = result.with_cache_key(key.clone());

        if let (Some(cache), Some(ttl)) = (&self.cache, cache_ttl) {
            if result.is_completed() {
                cache.put(&key, &result, ttl).await;
            }
        }

        let record = StepRecord {
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
            cached: false,
        };
        Ok((result, record))
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("config", &self.config)
            .field("cache", &self.cache.is_some())
            .field("audit_dir", &self.audit_dir)
            .field("annotate_skipped", &self.annotate_skipped)
            .finish_non_exhaustive()
    }
}

/// A single attempt: the capability call under the step timeout, with
/// panics turned into errors.
async fn invoke_once(
    step: &AgentStep,
    sandbox: Arc<dyn Sandbox>,
    context: StepContext,
    timeout: Duration,
) -> Result<StepResult, SandflowError> {
    let call = AssertUnwindSafe(step.capability.execute(sandbox, context)).catch_unwind();
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(panic)) => Err(SandflowError::StepExecution(format!(
            "step panicked: {}",
            panic_message(&panic)
        ))),
        Err(_) => Err(SandflowError::StepTimeout {
            step: step.name.clone(),
            timeout_secs: timeout.as_secs(),
        }),
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
