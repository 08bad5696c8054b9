//! Step descriptors and the capability seam steps plug into.

pub mod command;
pub mod manifest;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::{make_key_fn, KeyFn};
use crate::errors::SandflowError;
use crate::pipeline::state::{StepContext, StepResult};
use crate::sandbox::Sandbox;

pub use command::CommandStep;
pub use manifest::ManifestStep;

/// The work a step performs against a sandbox.
///
/// Returning `Err` (or panicking) is treated by the executor as a failed
/// step; a step may also report failure as data with [`StepResult::failed`].
#[async_trait]
pub trait StepCapability: Send + Sync {
    async fn execute(
        &self,
        sandbox: Arc<dyn Sandbox>,
        context: StepContext,
    ) -> Result<StepResult, SandflowError>;
}

/// Adapts an async closure into a [`StepCapability`].
pub struct FnStep<F> {
    f: F,
}

impl<F> FnStep<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> StepCapability for FnStep<F>
where
    F: Fn(Arc<dyn Sandbox>, StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StepResult, SandflowError>> + Send,
{
    async fn execute(
        &self,
        sandbox: Arc<dyn Sandbox>,
        context: StepContext,
    ) -> Result<StepResult, SandflowError> {
        (self.f)(sandbox, context).await
    }
}

/// A named unit of pipeline work with its own timeout and retry settings.
///
/// `timeout`, `max_retries` and `retry_delay` fall back to the pipeline's
/// values when unset.
#[derive(Clone)]
pub struct AgentStep {
    pub name: String,
    pub capability: Arc<dyn StepCapability>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    /// Static configuration; part of the step's cache key and handed to the
    /// capability as `metadata["config"]`.
    pub config: Value,
    pub description: Option<String>,
}

impl AgentStep {
    pub fn new(name: impl Into<String>, capability: Arc<dyn StepCapability>) -> Self {
        Self {
            name: name.into(),
            capability,
            timeout: None,
            max_retries: None,
            retry_delay: None,
            config: Value::Object(Default::default()),
            description: None,
        }
    }

    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<dyn Sandbox>, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepResult, SandflowError>> + Send + 'static,
    {
        Self::new(name, Arc::new(FnStep::new(f)))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = Some(max_retries);
        self.retry_delay = Some(delay);
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn key_fn(&self) -> KeyFn {
        make_key_fn(&self.name, &self.config)
    }
}

impl std::fmt::Debug for AgentStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentStep")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
