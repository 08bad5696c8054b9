use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use super::schema::CONFIG_SCHEMA;
use super::security::validate_security_patterns;
use super::types::PipelineFile;
use crate::cache::parse_expiration;
use crate::errors::SandflowError;

const MAX_CONFIG_BYTES: u64 = 1_048_576;

static ENV_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid env key regex"));

pub async fn parse_config(path: &Path) -> Result<PipelineFile, SandflowError> {
    if !path.exists() {
        return Err(SandflowError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > MAX_CONFIG_BYTES {
        return Err(SandflowError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    parse_config_str(&content)
}

pub fn parse_config_str(content: &str) -> Result<PipelineFile, SandflowError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;

    // Security pattern validation
    validate_security_patterns(&yaml)?;

    // JSON Schema validation
    validate_schema(&yaml)?;

    // Parse into typed config
    let config: PipelineFile = serde_yaml::from_value(yaml)?;

    // Semantic conflict detection
    validate_conflicts(&config)?;

    Ok(config)
}

/// Validate config against the JSON schema for structural correctness.
fn validate_schema(yaml: &serde_yaml::Value) -> Result<(), SandflowError> {
    let json_value = serde_json::to_value(yaml)
        .map_err(|e| SandflowError::Config(format!("Config conversion error: {}", e)))?;

    let compiled = jsonschema::JSONSchema::compile(&CONFIG_SCHEMA)
        .map_err(|e| SandflowError::Config(format!("Schema compilation error: {}", e)))?;

    let result = compiled.validate(&json_value);
    if let Err(errors) = result {
        // Advisory: typed parsing and conflict checks below are authoritative.
        for e in errors {
            warn!(validation_error = %format!("{} at {}", e, e.instance_path), "Config schema warning");
        }
    }

    Ok(())
}

/// Detect semantic conflicts in the parsed configuration.
fn validate_conflicts(config: &PipelineFile) -> Result<(), SandflowError> {
    if config.name.trim().is_empty() {
        return Err(SandflowError::Config("Pipeline name must not be empty".into()));
    }
    if config.steps.is_empty() {
        return Err(SandflowError::Config(format!("Pipeline '{}' has no steps", config.name)));
    }
    if config.concurrency == 0 {
        return Err(SandflowError::Config("concurrency must be at least 1".into()));
    }
    check_delay("retry_delay_seconds", config.retry_delay_seconds)?;
    parse_expiration(&config.cache.expiration)?;

    let mut names = HashSet::new();
    for step in &config.steps {
        if !names.insert(step.name.as_str()) {
            return Err(SandflowError::Config(format!("Duplicate step name '{}'", step.name)));
        }

        match (&step.command, &step.tool) {
            (Some(_), Some(_)) => {
                return Err(SandflowError::Config(format!(
                    "Step '{}' sets both 'command' and 'tool'",
                    step.name
                )));
            }
            (None, None) => {
                return Err(SandflowError::Config(format!(
                    "Step '{}' needs either 'command' or 'tool'",
                    step.name
                )));
            }
            _ => {}
        }

        if step.tool.is_some() && !step.env.is_empty() {
            warn!(step = %step.name, "'env' is ignored for tool steps");
        }
        for key in step.env.keys() {
            if !ENV_KEY_RE.is_match(key) {
                return Err(SandflowError::Config(format!(
                    "Step '{}' has invalid environment variable name '{}'",
                    step.name, key
                )));
            }
        }
        check_delay(&format!("steps.{}.retry_delay_seconds", step.name), step.retry_delay_seconds)?;
    }

    Ok(())
}

fn check_delay(field: &str, value: Option<f64>) -> Result<(), SandflowError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(SandflowError::Config(format!(
            "{} must be a non-negative number, got {}",
            field, v
        ))),
        _ => Ok(()),
    }
}
