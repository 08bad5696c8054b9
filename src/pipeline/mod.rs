pub mod config;
pub mod events;
pub mod executor;
pub mod metrics;
pub mod phase;
pub mod state;

pub use config::PipelineConfig;
pub use events::PipelineEvent;
pub use executor::{PipelineExecutor, RunReport, RunRequest};
pub use metrics::{RunSummary, StepRecord};
pub use phase::RunPhase;
pub use state::{StepContext, StepResult, StepResults, StepState};
