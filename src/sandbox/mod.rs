pub mod filesystem;
pub mod policy;
pub mod source;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::SandflowError;

pub use filesystem::{FilesystemSandbox, FilesystemSandboxFactory};
pub use policy::{write_policy, SecurityPolicy, POLICY_FILE_NAME};
pub use source::SourceDescriptor;

/// Directory name prefix for every materialized workspace.
pub const SANDBOX_DIR_PREFIX: &str = "sandbox_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Workspace sizing and lifetime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub base_path: PathBuf,
    pub max_size_mb: u64,
    pub timeout_seconds: u64,
    pub auto_cleanup: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./sandbox"),
            max_size_mb: 2048,
            timeout_seconds: 300,
            auto_cleanup: true,
        }
    }
}

impl SandboxConfig {
    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// An isolated, disposable workspace for one pipeline run.
///
/// All file operations take paths relative to the workspace root and fail
/// with [`SandflowError::SandboxNotInitialized`] until `setup` succeeds.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Materialize a workspace from `source` and return its root.
    async fn setup(&self, source: &SourceDescriptor) -> Result<PathBuf, SandflowError>;

    /// Release the workspace. Never fails; removal problems are logged.
    async fn teardown(&self, path: &Path);

    fn current_path(&self) -> Option<PathBuf>;

    /// Digest of a file; relative paths resolve against the workspace.
    /// Empty when the file does not exist.
    async fn file_hash(&self, path: &str) -> Result<String, SandflowError>;

    async fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, SandflowError>;

    async fn read_file(&self, path: &str) -> Result<String, SandflowError>;

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandflowError>;

    /// Workspace-relative paths of files matching `pattern`, sorted.
    async fn list_files(&self, pattern: &str) -> Result<Vec<String>, SandflowError>;
}

/// Produces a fresh sandbox for each run.
pub trait SandboxFactory: Send + Sync {
    fn create(&self) -> Arc<dyn Sandbox>;
}
