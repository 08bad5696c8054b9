use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandflowError {
    #[error("Sandbox setup failed: {0}")]
    SandboxSetup(String),

    #[error("Sandbox not initialized: call setup() before using the workspace")]
    SandboxNotInitialized,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid sandbox path: {0}")]
    InvalidPath(String),

    #[error("Command timed out after {timeout_secs}s: {command}")]
    CommandTimeout { command: String, timeout_secs: u64 },

    #[error("Step execution failed: {0}")]
    StepExecution(String),

    #[error("Step '{step}' timed out after {timeout_secs}s")]
    StepTimeout { step: String, timeout_secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SandflowError {
    /// Errors that mean the executor itself was misused or broke an internal
    /// invariant. These escape a run instead of becoming a failed step result.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, SandflowError::SandboxNotInitialized | SandflowError::Internal(_))
    }
}
