use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of a single step invocation.
///
/// A result carries an error message exactly when its state is
/// [`StepState::Failed`]; the constructors are the only way to pick a state,
/// so the pairing cannot drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStepResult")]
pub struct StepResult {
    state: StepState,
    output: Value,
    artifacts: BTreeMap<String, String>,
    metrics: BTreeMap<String, f64>,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_key: Option<String>,
}

impl StepResult {
    fn with_state(state: StepState, error: Option<String>) -> Self {
        Self {
            state,
            output: Value::Null,
            artifacts: BTreeMap::new(),
            metrics: BTreeMap::new(),
            error,
            cache_key: None,
        }
    }

    pub fn completed(output: impl Into<Value>) -> Self {
        Self::with_state(StepState::Completed, None).with_output(output)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::with_state(StepState::Failed, Some(error.into()))
    }

    pub fn skipped() -> Self {
        Self::with_state(StepState::Skipped, None)
    }

    pub fn pending() -> Self {
        Self::with_state(StepState::Pending, None)
    }

    pub fn running() -> Self {
        Self::with_state(StepState::Running, None)
    }

    pub fn with_output(mut self, output: impl Into<Value>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_artifact(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.artifacts.insert(name.into(), path.into());
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    pub fn output(&self) -> &Value {
        &self.output
    }

    pub fn artifacts(&self) -> &BTreeMap<String, String> {
        &self.artifacts
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    pub fn is_completed(&self) -> bool {
        self.state == StepState::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.state == StepState::Failed
    }
}

#[derive(Deserialize)]
struct RawStepResult {
    state: StepState,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    artifacts: BTreeMap<String, String>,
    #[serde(default)]
    metrics: BTreeMap<String, f64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    cache_key: Option<String>,
}

impl TryFrom<RawStepResult> for StepResult {
    type Error = String;

    fn try_from(raw: RawStepResult) -> Result<Self, Self::Error> {
        let failed = raw.state == StepState::Failed;
        if failed != raw.error.is_some() {
            return Err(format!(
                "step result in state '{}' {} an error message",
                raw.state,
                if failed { "requires" } else { "must not carry" }
            ));
        }
        Ok(Self {
            state: raw.state,
            output: raw.output,
            artifacts: raw.artifacts,
            metrics: raw.metrics,
            error: raw.error,
            cache_key: raw.cache_key,
        })
    }
}

/// Step results keyed by step name, in the order the steps were recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepResults {
    entries: Vec<(String, StepResult)>,
}

impl StepResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result. Re-recording an existing name replaces the value in
    /// place and keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, result: StepResult) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = result,
            None => self.entries.push((name, result)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&StepResult> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StepResult)> {
        self.entries.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub fn last(&self) -> Option<(&str, &StepResult)> {
        self.entries.last().map(|(n, r)| (n.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for StepResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, result) in &self.entries {
            map.serialize_entry(name, result)?;
        }
        map.end()
    }
}

impl IntoIterator for StepResults {
    type Item = (String, StepResult);
    type IntoIter = std::vec::IntoIter<(String, StepResult)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Everything a step sees when it is invoked. Built fresh for every attempt;
/// a step cannot reach the executor's own accumulated results through it.
#[derive(Debug, Clone, Serialize)]
pub struct StepContext {
    pub sandbox_path: PathBuf,
    pub input_data: Value,
    pub previous_results: StepResults,
    pub metadata: BTreeMap<String, Value>,
}

impl StepContext {
    pub fn new(sandbox_path: PathBuf, input_data: Value) -> Self {
        Self {
            sandbox_path,
            input_data,
            previous_results: StepResults::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn previous(&self, step: &str) -> Option<&StepResult> {
        self.previous_results.get(step)
    }
}
