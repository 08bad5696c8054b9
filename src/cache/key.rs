use serde_json::{json, Value};

use crate::errors::SandflowError;
use crate::hashing::{canonical_json, hash_bytes, hash_value};
use crate::sandbox::SourceDescriptor;

/// Scalars are keyed by their text form so that `"3"` and `3` collide, the
/// same way a caller would see them printed. Objects and arrays stay
/// structured.
fn keyable_input(input: &Value) -> Value {
    match input {
        Value::Object(_) | Value::Array(_) => input.clone(),
        Value::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

/// Derive the cache key for one step invocation within one run.
///
/// The key is `<step>:<digest>` where the digest covers the step name, the
/// run identifier, the (coerced) input and the step configuration.
pub fn derive_key(step: &str, run_id: &str, input: &Value, config: &Value) -> String {
    let body = json!({
        "task": step,
        "flow_run": run_id,
        "input": keyable_input(input),
        "config": config,
    });
    format!("{}:{}", step, hash_bytes(canonical_json(&body).as_bytes()))
}

/// Key function bound to one step and its static configuration. Keys from it
/// depend only on the runtime input, so identical inputs hit across runs.
#[derive(Debug, Clone)]
pub struct KeyFn {
    step_name: String,
    config_json: String,
}

impl KeyFn {
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn key(&self, input: &Value) -> String {
        let body = format!(
            "{{\"agent\":{},\"config\":{},\"input\":{}}}",
            Value::String(self.step_name.clone()),
            self.config_json,
            canonical_json(input),
        );
        format!("{}:{}", self.step_name, hash_bytes(body.as_bytes()))
    }
}

pub fn make_key_fn(step: &str, static_config: &Value) -> KeyFn {
    KeyFn {
        step_name: step.to_string(),
        config_json: canonical_json(static_config),
    }
}

/// Digest of a sandbox source descriptor, usable to memoize workspace
/// materialization.
pub fn source_cache_key(source: &SourceDescriptor) -> Result<String, SandflowError> {
    hash_value(source)
}
