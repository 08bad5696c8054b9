use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::StepCapability;
use crate::errors::SandflowError;
use crate::pipeline::state::{StepContext, StepResult};
use crate::sandbox::Sandbox;

/// Registry name of the built-in manifest tool.
pub const MANIFEST_TOOL: &str = "workspace-manifest";

/// Records the content digest of every workspace file matching a glob.
///
/// Reads `pattern` (default `*`) and `output_path` from the step
/// configuration. When `output_path` is set the manifest is also written
/// into the workspace and listed as an artifact.
#[derive(Debug, Clone, Default)]
pub struct ManifestStep;

#[async_trait]
impl StepCapability for ManifestStep {
    async fn execute(
        &self,
        sandbox: Arc<dyn Sandbox>,
        context: StepContext,
    ) -> Result<StepResult, SandflowError> {
        let config = context.metadata.get("config");
        let pattern = config
            .and_then(|c| c.get("pattern"))
            .and_then(Value::as_str)
            .unwrap_or("*");
        let output_path = config
            .and_then(|c| c.get("output_path"))
            .and_then(Value::as_str);

        let mut files = Map::new();
        for path in sandbox.list_files(pattern).await? {
            if Some(path.as_str()) == output_path {
                continue;
            }
            let digest = sandbox.file_hash(&path).await?;
            files.insert(path, Value::String(digest));
        }

        let count = files.len();
        let manifest = Value::Object(files);
        let mut result = StepResult::completed(serde_json::json!({ "files": manifest }))
            .with_metric("file_count", count as f64);

        if let Some(out) = output_path {
            sandbox
                .write_file(out, &serde_json::to_string_pretty(&manifest)?)
                .await?;
            result = result.with_artifact("manifest", out);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::hash_bytes;
    use crate::sandbox::{FilesystemSandbox, SandboxConfig, SourceDescriptor};
    use serde_json::json;

    #[tokio::test]
    async fn test_manifest_lists_hashes() {
        let base = tempfile::tempdir().unwrap();
        let sandbox: Arc<dyn Sandbox> =
            Arc::new(FilesystemSandbox::new(SandboxConfig::default().with_base_path(base.path())));
        let path = sandbox.setup(&SourceDescriptor::Empty).await.unwrap();
        sandbox.write_file("a.rs", "a").await.unwrap();
        sandbox.write_file("docs/b.md", "b").await.unwrap();

        let mut ctx = StepContext::new(path, Value::Null);
        ctx.metadata.insert(
            "config".into(),
            json!({"pattern": "*.rs", "output_path": "manifest.json"}),
        );

        let result = ManifestStep.execute(sandbox.clone(), ctx).await.unwrap();
        assert!(result.is_completed());
        assert_eq!(result.output()["files"], json!({"a.rs": hash_bytes(b"a")}));
        assert_eq!(result.metric("file_count"), Some(1.0));
        assert_eq!(result.artifacts()["manifest"], "manifest.json");

        let written: Value =
            serde_json::from_str(&sandbox.read_file("manifest.json").await.unwrap()).unwrap();
        assert_eq!(written, json!({"a.rs": hash_bytes(b"a")}));
    }

    #[tokio::test]
    async fn test_manifest_default_pattern() {
        let base = tempfile::tempdir().unwrap();
        let sandbox: Arc<dyn Sandbox> =
            Arc::new(FilesystemSandbox::new(SandboxConfig::default().with_base_path(base.path())));
        let path = sandbox.setup(&SourceDescriptor::Empty).await.unwrap();
        sandbox.write_file("x.txt", "x").await.unwrap();
        sandbox.write_file("y/z.txt", "z").await.unwrap();

        let result = ManifestStep
            .execute(sandbox, StepContext::new(path, Value::Null))
            .await
            .unwrap();
        assert_eq!(result.metric("file_count"), Some(2.0));
        assert!(result.artifacts().is_empty());
    }
}
