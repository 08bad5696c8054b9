use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::state::{StepResults, StepState};

/// Execution bookkeeping for one step, kept outside its [`StepResult`].
///
/// [`StepResult`]: super::state::StepResult
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub attempts: u32,
    pub duration_ms: u64,
    pub cached: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_steps: usize,
    pub executed: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cache_hits: usize,
    pub total_attempts: u32,
    pub step_duration_ms: u64,
}

pub fn compute_summary(
    total_steps: usize,
    results: &StepResults,
    records: &BTreeMap<String, StepRecord>,
) -> RunSummary {
    let count = |state: StepState| results.iter().filter(|(_, r)| r.state() == state).count();

    RunSummary {
        total_steps,
        executed: records.len(),
        completed: count(StepState::Completed),
        failed: count(StepState::Failed),
        skipped: count(StepState::Skipped),
        cache_hits: records.values().filter(|r| r.cached).count(),
        total_attempts: records.values().map(|r| r.attempts).sum(),
        step_duration_ms: records.values().map(|r| r.duration_ms).sum(),
    }
}
