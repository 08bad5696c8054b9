use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conditions::ConditionSpec;
use crate::sandbox::{SandboxConfig, SecurityPolicy};

/// A pipeline as written in a YAML file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineFile {
    pub name: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    pub max_retries: Option<u32>,
    pub retry_delay_seconds: Option<f64>,
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub continue_when: ConditionSpec,
    pub security: Option<SecurityPolicy>,
    /// Prompt templates registered by name before the pipeline is built.
    #[serde(default)]
    pub skills: BTreeMap<String, String>,
    pub steps: Vec<StepSpec>,
}

fn default_concurrency() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_expiration")]
    pub expiration: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { enabled: true, expiration: default_expiration() }
    }
}

fn default_true() -> bool {
    true
}

fn default_expiration() -> String {
    "1d".to_string()
}

/// One step entry. Exactly one of `command` and `tool` must be set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepSpec {
    pub name: String,
    pub description: Option<String>,
    /// Shell command run in the workspace.
    pub command: Option<String>,
    /// Name of a tool in the registry.
    pub tool: Option<String>,
    /// Environment for `command`; values starting with `$` are read from the
    /// process environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "empty_object")]
    pub config: Value,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_seconds: Option<f64>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}
