use std::path::Path;
use std::process::Stdio;

use crate::errors::SandflowError;
use tracing::info;

/// Fetch a single revision of `url` into `target` with the git CLI.
///
/// `git_ref` selects a branch or tag; without it the remote's default branch
/// is used.
pub async fn shallow_clone(url: &str, git_ref: Option<&str>, target: &Path) -> Result<(), SandflowError> {
    let mut cmd = tokio::process::Command::new("git");
    cmd.arg("clone").arg("--depth").arg("1");
    if let Some(r) = git_ref {
        cmd.arg("--branch").arg(r);
    }
    cmd.arg(url)
        .arg(target)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = cmd
        .output()
        .await
        .map_err(|e| SandflowError::SandboxSetup(format!("Failed to run git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SandflowError::SandboxSetup(format!(
            "git clone of {} failed (exit {}): {}",
            url,
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    info!(url = %url, git_ref = git_ref.unwrap_or("HEAD"), target = %target.display(), "Repository cloned");
    Ok(())
}
