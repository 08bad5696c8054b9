use std::collections::HashSet;
use std::time::Duration;

use crate::cache::parse_expiration;
use crate::conditions::ShouldContinue;
use crate::errors::{RetryPolicy, SandflowError};
use crate::sandbox::SecurityPolicy;
use crate::step::AgentStep;

/// Ordered steps plus the run-wide knobs the executor applies to them.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub name: String,
    pub steps: Vec<AgentStep>,
    /// Upper bound on independent runs in flight for `run_many`.
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Per-step timeout when a step declares none.
    pub timeout: Duration,
    pub cache_enabled: bool,
    pub cache_expiration: String,
    pub continue_when: ShouldContinue,
    pub security_policy: Option<SecurityPolicy>,
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>, steps: Vec<AgentStep>) -> Self {
        Self {
            name: name.into(),
            steps,
            concurrency: 1,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(3600),
            cache_enabled: true,
            cache_expiration: "1d".to_string(),
            continue_when: ShouldContinue::Always,
            security_policy: None,
        }
    }

    pub fn with_continue_when(mut self, condition: ShouldContinue) -> Self {
        self.continue_when = condition;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_cache(mut self, enabled: bool, expiration: impl Into<String>) -> Self {
        self.cache_enabled = enabled;
        self.cache_expiration = expiration.into();
        self
    }

    pub fn with_security_policy(mut self, policy: SecurityPolicy) -> Self {
        self.security_policy = Some(policy);
        self
    }

    pub fn cache_ttl(&self) -> Result<Duration, SandflowError> {
        parse_expiration(&self.cache_expiration)
    }

    pub fn step_timeout(&self, step: &AgentStep) -> Duration {
        step.timeout.unwrap_or(self.timeout)
    }

    pub fn retry_policy(&self, step: &AgentStep) -> RetryPolicy {
        RetryPolicy::new(
            step.max_retries.unwrap_or(self.max_retries),
            step.retry_delay.unwrap_or(self.retry_delay),
        )
    }

    pub fn validate(&self) -> Result<(), SandflowError> {
        if self.name.trim().is_empty() {
            return Err(SandflowError::Config("Pipeline name must not be empty".into()));
        }
        if self.steps.is_empty() {
            return Err(SandflowError::Config(format!(
                "Pipeline '{}' has no steps",
                self.name
            )));
        }
        if self.concurrency == 0 {
            return Err(SandflowError::Config("concurrency must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(SandflowError::Config("Step name must not be empty".into()));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(SandflowError::Config(format!(
                    "Duplicate step name '{}' in pipeline '{}'",
                    step.name, self.name
                )));
            }
        }

        self.cache_ttl()?;
        Ok(())
    }
}
