//! Step pipelines executed against disposable sandboxed workspaces.
//!
//! A [`PipelineExecutor`] materializes a workspace from a
//! [`SourceDescriptor`], runs each [`AgentStep`] of a [`PipelineConfig`] in
//! order, consults a [`ShouldContinue`] predicate after every step and
//! tears the workspace down again however the run ends.

pub mod audit;
pub mod cache;
pub mod cli;
pub mod conditions;
pub mod config;
pub mod errors;
pub mod git;
pub mod hashing;
pub mod pipeline;
pub mod registry;
pub mod sandbox;
pub mod step;

pub use cache::{derive_key, make_key_fn, KeyFn, MemoryCache, ResultCache};
pub use conditions::{Comparison, ConditionSpec, ShouldContinue};
pub use errors::SandflowError;
pub use hashing::hash_file;
pub use pipeline::{
    PipelineConfig, PipelineEvent, PipelineExecutor, RunPhase, RunReport, RunRequest, StepContext,
    StepResult, StepResults, StepState,
};
pub use registry::Registry;
pub use sandbox::{FilesystemSandbox, Sandbox, SandboxConfig, SandboxFactory, SourceDescriptor};
pub use step::{AgentStep, CommandStep, StepCapability};
