use std::path::Path;

use crate::errors::SandflowError;
use tracing::{debug, warn};

/// Commit id HEAD points at, if `path` is a repository with at least one
/// commit.
pub fn head_revision(path: &Path) -> Option<String> {
    let repo = git2::Repository::open(path).ok()?;
    let commit = repo.head().ok()?.peel_to_commit().ok()?;
    Some(commit.id().to_string())
}

/// True when the working tree has no modified, staged or untracked files.
pub fn check_repo_clean(path: &Path) -> Result<bool, SandflowError> {
    let repo = git2::Repository::open(path)
        .map_err(|e| SandflowError::Git(format!("Failed to open repo: {}", e)))?;

    let mut options = git2::StatusOptions::new();
    options.include_untracked(true).include_ignored(false);

    let statuses = repo
        .statuses(Some(&mut options))
        .map_err(|e| SandflowError::Git(format!("Failed to read status: {}", e)))?;

    Ok(statuses.is_empty())
}

/// Local sources are copied as they are on disk, so uncommitted changes end
/// up in the workspace. Flag that.
pub fn warn_if_dirty(path: &Path) {
    match check_repo_clean(path) {
        Ok(true) => {}
        Ok(false) => warn!(path = %path.display(), "Source repository has uncommitted changes"),
        Err(e) => debug!(path = %path.display(), error = %e, "Source is not a git repository"),
    }
}
