use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::StepCapability;
use crate::errors::SandflowError;
use crate::pipeline::state::{StepContext, StepResult};
use crate::sandbox::Sandbox;

/// Runs a shell command in the workspace. Exit code zero completes the step;
/// anything else fails it with the tail of stderr as the error.
#[derive(Debug, Clone)]
pub struct CommandStep {
    command: String,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

const STDERR_TAIL_CHARS: usize = 500;

impl CommandStep {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Timeout for the command itself, separate from the step timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn command_line(&self) -> String {
        if self.env.is_empty() {
            return self.command.clone();
        }
        let assignments: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("export {}={};", k, shell_quote(v)))
            .collect();
        format!("{} {}", assignments.join(" "), self.command)
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

#[async_trait]
impl StepCapability for CommandStep {
    async fn execute(
        &self,
        sandbox: Arc<dyn Sandbox>,
        _context: StepContext,
    ) -> Result<StepResult, SandflowError> {
        let started = Instant::now();
        let output = sandbox.execute(&self.command_line(), self.timeout).await?;
        let duration_ms = started.elapsed().as_millis() as f64;
        debug!(command = %self.command, exit_code = output.exit_code, "Command finished");

        let payload = json!({
            "exit_code": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
        });

        let result = if output.success() {
            StepResult::completed(payload)
        } else {
            let stderr = output.stderr.trim();
            let message = if stderr.is_empty() {
                format!("command exited with status {}", output.exit_code)
            } else {
                format!(
                    "command exited with status {}: {}",
                    output.exit_code,
                    tail(stderr, STDERR_TAIL_CHARS)
                )
            };
            StepResult::failed(message).with_output(payload)
        };

        Ok(result
            .with_metric("exit_code", output.exit_code as f64)
            .with_metric("duration_ms", duration_ms))
    }
}
