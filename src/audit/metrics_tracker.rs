use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::utils::atomic_write;
use crate::errors::SandflowError;
use crate::pipeline::metrics::{RunSummary, StepRecord};
use crate::pipeline::phase::RunPhase;
use crate::pipeline::state::StepResult;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct SessionData {
    pub run_id: String,
    pub pipeline: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub phase: Option<RunPhase>,
    pub steps: BTreeMap<String, StepSessionData>,
    pub summary: Option<RunSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StepSessionData {
    pub index: usize,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub attempts: u32,
    pub duration_ms: Option<u64>,
    pub cached: bool,
    pub status: String,
    pub error: Option<String>,
}

pub struct MetricsTracker {
    path: PathBuf,
    data: SessionData,
}

impl MetricsTracker {
    pub fn new(base_dir: &Path, run_id: &str, pipeline: &str) -> Self {
        Self {
            path: base_dir.join("session.json"),
            data: SessionData {
                run_id: run_id.to_string(),
                pipeline: pipeline.to_string(),
                started_at: Utc::now().to_rfc3339(),
                ..Default::default()
            },
        }
    }

    pub fn start_step(&mut self, step: &str, index: usize) {
        self.data.steps.insert(step.to_string(), StepSessionData {
            index,
            started_at: Some(Utc::now().to_rfc3339()),
            completed_at: None,
            attempts: 0,
            duration_ms: None,
            cached: false,
            status: "running".to_string(),
            error: None,
        });
    }

    pub async fn end_step(
        &mut self,
        step: &str,
        result: &StepResult,
        record: &StepRecord,
    ) -> Result<(), SandflowError> {
        if let Some(entry) = self.data.steps.get_mut(step) {
            entry.completed_at = Some(Utc::now().to_rfc3339());
            entry.attempts = record.attempts;
            entry.duration_ms = Some(record.duration_ms);
            entry.cached = record.cached;
            entry.status = result.state().to_string();
            entry.error = result.error().map(str::to_string);
        }
        self.save().await
    }

    pub async fn finish(&mut self, phase: RunPhase, summary: RunSummary) -> Result<(), SandflowError> {
        self.data.completed_at = Some(Utc::now().to_rfc3339());
        self.data.phase = Some(phase);
        self.data.summary = Some(summary);
        self.save().await
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub async fn save(&self) -> Result<(), SandflowError> {
        let json = serde_json::to_string_pretty(&self.data)?;
        atomic_write(&self.path, &json).await
    }
}
