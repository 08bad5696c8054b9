use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::SandflowError;

/// File written into the workspace root for agent tooling to pick up.
pub const POLICY_FILE_NAME: &str = ".sandflow_settings.json";

const DEFAULT_ALLOW: &[&str] = &[
    "Read(./**)",
    "Write(./**)",
    "Edit(./**)",
    "Glob(./**)",
    "Grep(./**)",
    "Bash(*)",
];

/// Permissions granted to agents operating inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SecurityPolicy {
    #[serde(default)]
    pub sandbox: SandboxPermissions,
    #[serde(default)]
    pub permissions: Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxPermissions {
    pub enabled: bool,
    pub auto_allow_bash_if_sandboxed: bool,
}

impl Default for SandboxPermissions {
    fn default() -> Self {
        Self { enabled: true, auto_allow_bash_if_sandboxed: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub default_mode: String,
    pub allow: Vec<String>,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            default_mode: "acceptEdits".to_string(),
            allow: DEFAULT_ALLOW.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Write `policy` into the workspace root, replacing any previous copy.
pub async fn write_policy(workspace: &Path, policy: &SecurityPolicy) -> Result<PathBuf, SandflowError> {
    let path = workspace.join(POLICY_FILE_NAME);
    let json = serde_json::to_string_pretty(policy)?;
    tokio::fs::write(&path, json).await?;
    debug!(path = %path.display(), "Security policy written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_policy_shape() {
        let value = serde_json::to_value(SecurityPolicy::default()).unwrap();
        assert_eq!(
            value,
            json!({
                "sandbox": {"enabled": true, "autoAllowBashIfSandboxed": true},
                "permissions": {
                    "defaultMode": "acceptEdits",
                    "allow": ["Read(./**)", "Write(./**)", "Edit(./**)", "Glob(./**)", "Grep(./**)", "Bash(*)"]
                }
            })
        );
    }

    #[test]
    fn test_partial_policy_fills_defaults() {
        let policy: SecurityPolicy = serde_json::from_value(json!({
            "permissions": {"defaultMode": "plan", "allow": ["Read(./**)"]}
        }))
        .unwrap();
        assert!(policy.sandbox.enabled);
        assert_eq!(policy.permissions.default_mode, "plan");
        assert_eq!(policy.permissions.allow, vec!["Read(./**)".to_string()]);
    }

    #[tokio::test]
    async fn test_write_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_policy(dir.path(), &SecurityPolicy::default()).await.unwrap();
        assert_eq!(path, dir.path().join(POLICY_FILE_NAME));
        let written: SecurityPolicy =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(written, SecurityPolicy::default());
    }
}
