use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::credentials::resolve_env;
use super::types::{PipelineFile, StepSpec};
use crate::errors::SandflowError;
use crate::pipeline::PipelineConfig;
use crate::registry::Registry;
use crate::step::{AgentStep, CommandStep, StepCapability};

impl PipelineFile {
    /// Add the file's skill templates to `registry`.
    pub fn register_skills(&self, registry: &mut Registry) {
        for (name, prompt) in &self.skills {
            registry.register_skill(name.clone(), prompt.clone());
        }
    }

    /// Resolve every step against `registry` and produce a validated
    /// [`PipelineConfig`].
    pub fn build(&self, registry: &Registry) -> Result<PipelineConfig, SandflowError> {
        let steps = self
            .steps
            .iter()
            .map(|spec| build_step(spec, registry))
            .collect::<Result<Vec<_>, _>>()?;

        let mut config = PipelineConfig::new(self.name.clone(), steps)
            .with_concurrency(self.concurrency)
            .with_cache(self.cache.enabled, self.cache.expiration.clone())
            .with_continue_when(self.continue_when.clone().into());

        if self.max_retries.is_some() || self.retry_delay_seconds.is_some() {
            let retries = self.max_retries.unwrap_or(config.max_retries);
            let delay = match self.retry_delay_seconds {
                Some(secs) => seconds(secs, "retry_delay_seconds")?,
                None => config.retry_delay,
            };
            config = config.with_retries(retries, delay);
        }
        if let Some(secs) = self.timeout_seconds {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(policy) = &self.security {
            config = config.with_security_policy(policy.clone());
        }

        config.validate()?;
        debug!(pipeline = %config.name, steps = config.steps.len(), "Pipeline built from file");
        Ok(config)
    }
}

fn build_step(spec: &StepSpec, registry: &Registry) -> Result<AgentStep, SandflowError> {
    let capability: Arc<dyn StepCapability> = match (&spec.command, &spec.tool) {
        (Some(command), None) => {
            let mut step = CommandStep::new(command.clone()).with_env(resolve_env(&spec.env));
            if let Some(secs) = spec.timeout_seconds {
                step = step.with_timeout(Duration::from_secs(secs));
            }
            Arc::new(step)
        }
        (None, Some(tool)) => registry.require_tool(tool)?,
        _ => {
            return Err(SandflowError::Config(format!(
                "Step '{}' needs exactly one of 'command' or 'tool'",
                spec.name
            )))
        }
    };

    let mut step = AgentStep::new(spec.name.clone(), capability).with_config(spec.config.clone());
    if let Some(description) = &spec.description {
        step = step.with_description(description.clone());
    }
    if let Some(secs) = spec.timeout_seconds {
        step = step.with_timeout(Duration::from_secs(secs));
    }
    if spec.max_retries.is_some() || spec.retry_delay_seconds.is_some() {
        // Unset halves fall back to the pipeline defaults at run time.
        step.max_retries = spec.max_retries;
        step.retry_delay = spec
            .retry_delay_seconds
            .map(|secs| seconds(secs, "retry_delay_seconds"))
            .transpose()?;
    }
    Ok(step)
}

fn seconds(value: f64, field: &str) -> Result<Duration, SandflowError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| SandflowError::Config(format!("Invalid {}: {}", field, e)))
}
