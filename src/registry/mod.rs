//! Name lookup for user-supplied tools and skill prompt templates.
//!
//! Built once before any run and shared read-only as `Arc<Registry>`.
//! Registering a name twice keeps the later entry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::errors::SandflowError;
use crate::step::manifest::MANIFEST_TOOL;
use crate::step::{ManifestStep, StepCapability};

#[derive(Clone, Default)]
pub struct Registry {
    tools: HashMap<String, Arc<dyn StepCapability>>,
    skills: HashMap<String, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the tools shipped with this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_tool(MANIFEST_TOOL, Arc::new(ManifestStep));
        registry
    }

    pub fn register_tool(&mut self, name: impl Into<String>, tool: Arc<dyn StepCapability>) {
        let name = name.into();
        if self.tools.insert(name.clone(), tool).is_some() {
            debug!(tool = %name, "Tool registration replaced");
        }
    }

    pub fn register_skill(&mut self, name: impl Into<String>, prompt: impl Into<String>) {
        let name = name.into();
        if self.skills.insert(name.clone(), prompt.into()).is_some() {
            debug!(skill = %name, "Skill registration replaced");
        }
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn StepCapability>> {
        self.tools.get(name).cloned()
    }

    pub fn require_tool(&self, name: &str) -> Result<Arc<dyn StepCapability>, SandflowError> {
        self.tool(name)
            .ok_or_else(|| SandflowError::Registry(format!("Unknown tool: '{}'", name)))
    }

    pub fn skill(&self, name: &str) -> Option<&str> {
        self.skills.get(name).map(String::as_str)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn skill_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.skills.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("tools", &self.tool_names())
            .field("skills", &self.skill_names())
            .finish()
    }
}
