use std::path::PathBuf;

use super::phase::RunPhase;
use super::state::StepState;

/// Messages sent from the executor to an attached observer (progress bars,
/// log forwarders).
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A run started and is acquiring its sandbox
    RunStarted {
        run_id: String,
        pipeline: String,
        total_steps: usize,
    },
    /// The workspace is materialized
    SandboxReady {
        run_id: String,
        path: PathBuf,
    },
    StepStarted {
        run_id: String,
        step: String,
        index: usize,
    },
    StepFinished {
        run_id: String,
        step: String,
        state: StepState,
        duration_ms: u64,
        cached: bool,
    },
    /// The continuation predicate ended the run early
    RunStopped {
        run_id: String,
        after_step: String,
    },
    RunFinished {
        run_id: String,
        phase: RunPhase,
        duration_ms: u64,
    },
    /// The run could not start or hit an invariant violation
    RunFailed {
        run_id: String,
        error: String,
    },
}
