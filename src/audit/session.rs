use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use crate::errors::SandflowError;
use crate::pipeline::metrics::{RunSummary, StepRecord};
use crate::pipeline::phase::RunPhase;
use crate::pipeline::state::StepResult;
use super::metrics_tracker::MetricsTracker;
use super::utils::{atomic_write, safe_file_stem};
use super::workflow_logger::WorkflowLogger;

/// Crash-safe on-disk trail of one run: `workflow.log`, `session.json` and
/// one `steps/<step>.json` per finished step.
pub struct AuditSession {
    base_dir: PathBuf,
    run_id: String,
    metrics: Arc<Mutex<MetricsTracker>>,
    workflow_logger: Arc<Mutex<WorkflowLogger>>,
}

impl AuditSession {
    pub async fn initialize(
        output_dir: &Path,
        run_id: &str,
        pipeline: &str,
    ) -> Result<Self, SandflowError> {
        let base_dir = output_dir.join(run_id);
        tokio::fs::create_dir_all(base_dir.join("steps")).await?;

        let metrics = MetricsTracker::new(&base_dir, run_id, pipeline);
        metrics.save().await?;
        let workflow_logger = WorkflowLogger::new(&base_dir);
        workflow_logger.initialize(run_id, pipeline).await?;

        Ok(Self {
            base_dir,
            run_id: run_id.to_string(),
            metrics: Arc::new(Mutex::new(metrics)),
            workflow_logger: Arc::new(Mutex::new(workflow_logger)),
        })
    }

    pub async fn log(&self, message: &str) -> Result<(), SandflowError> {
        self.workflow_logger.lock().await.log_event(message).await
    }

    pub async fn start_step(&self, step: &str, index: usize) -> Result<(), SandflowError> {
        self.metrics.lock().await.start_step(step, index);
        self.log(&format!("Step {} started (#{})", step, index + 1)).await
    }

    pub async fn end_step(
        &self,
        step: &str,
        result: &StepResult,
        record: &StepRecord,
    ) -> Result<(), SandflowError> {
        self.metrics.lock().await.end_step(step, result, record).await?;

        let path = self.base_dir.join("steps").join(format!("{}.json", safe_file_stem(step)));
        atomic_write(&path, &serde_json::to_string_pretty(result)?).await?;

        let message = match result.error() {
            Some(err) => format!(
                "Step {} failed after {} attempt(s), {}ms: {}",
                step, record.attempts, record.duration_ms, err
            ),
            None => format!(
                "Step {} {}{} in {}ms",
                step,
                result.state(),
                if record.cached { " (cached)" } else { "" },
                record.duration_ms
            ),
        };
        self.log(&message).await
    }

    pub async fn finish(&self, phase: RunPhase, summary: RunSummary) -> Result<(), SandflowError> {
        let line = format!(
            "Run {} {}: {} completed, {} failed, {} skipped",
            self.run_id, phase, summary.completed, summary.failed, summary.skipped
        );
        self.metrics.lock().await.finish(phase, summary).await?;
        self.log(&line).await
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}
