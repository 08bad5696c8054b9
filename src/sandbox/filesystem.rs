use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{CommandOutput, Sandbox, SandboxConfig, SandboxFactory, SourceDescriptor, SANDBOX_DIR_PREFIX};
use crate::errors::SandflowError;
use crate::hashing::hash_file;

/// Sandbox backed by a plain directory under `base_path`.
#[derive(Debug)]
pub struct FilesystemSandbox {
    config: SandboxConfig,
    current: RwLock<Option<PathBuf>>,
}

impl FilesystemSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config, current: RwLock::new(None) }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn set_current(&self, path: Option<PathBuf>) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = path;
    }

    fn require_path(&self) -> Result<PathBuf, SandflowError> {
        self.current_path().ok_or(SandflowError::SandboxNotInitialized)
    }

    /// Resolve a workspace-relative path, refusing anything that could leave
    /// the workspace. Symlinks are followed: the deepest existing part of the
    /// path must still land under the workspace root.
    async fn resolve(&self, relative: &str) -> Result<PathBuf, SandflowError> {
        let root = self.require_path()?;
        let candidate = Path::new(relative);
        for component in candidate.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(SandflowError::InvalidPath(relative.to_string()));
                }
            }
        }

        let target = root.join(candidate);
        let mut existing = target.as_path();
        while tokio::fs::symlink_metadata(existing).await.is_err() {
            match existing.parent() {
                Some(parent) => existing = parent,
                None => break,
            }
        }
        // Dangling links fail to canonicalize and are refused with the rest.
        let real = tokio::fs::canonicalize(existing)
            .await
            .map_err(|_| SandflowError::InvalidPath(relative.to_string()))?;
        if !real.starts_with(&root) {
            warn!(path = %relative, resolved = %real.display(), "Path resolves outside the workspace");
            return Err(SandflowError::InvalidPath(relative.to_string()));
        }
        Ok(target)
    }

    async fn workspace_dir(&self) -> Result<PathBuf, SandflowError> {
        tokio::fs::create_dir_all(&self.config.base_path).await.map_err(|e| {
            SandflowError::SandboxSetup(format!(
                "Cannot create base path {}: {}",
                self.config.base_path.display(),
                e
            ))
        })?;
        let base = tokio::fs::canonicalize(&self.config.base_path).await.map_err(|e| {
            SandflowError::SandboxSetup(format!(
                "Cannot resolve base path {}: {}",
                self.config.base_path.display(),
                e
            ))
        })?;
        claim_workspace_dir(&base, || {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("{}{}", SANDBOX_DIR_PREFIX, &id[..8])
        })
        .await
        .map_err(|e| SandflowError::SandboxSetup(format!("Failed to create workspace: {}", e)))
    }

    async fn materialize(&self, source: &SourceDescriptor, target: &Path) -> Result<(), SandflowError> {
        match source {
            SourceDescriptor::Remote { url, git_ref } => {
                crate::git::shallow_clone(url, git_ref.as_deref(), target).await
            }
            SourceDescriptor::Local(path) => {
                let meta = tokio::fs::metadata(path).await.map_err(|_| {
                    SandflowError::SandboxSetup(format!("Source directory does not exist: {}", path.display()))
                })?;
                if !meta.is_dir() {
                    return Err(SandflowError::SandboxSetup(format!(
                        "Source is not a directory: {}",
                        path.display()
                    )));
                }
                crate::git::warn_if_dirty(path);

                let (src, dst) = (path.clone(), target.to_path_buf());
                tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
                    .await
                    .map_err(|e| SandflowError::SandboxSetup(format!("Copy task failed: {}", e)))?
                    .map_err(|e| {
                        SandflowError::SandboxSetup(format!("Failed to copy {}: {}", path.display(), e))
                    })
            }
            SourceDescriptor::Empty => Ok(()),
        }
    }

    async fn enforce_size_limit(&self, workspace: &Path) -> Result<(), SandflowError> {
        let dir = workspace.to_path_buf();
        let size = tokio::task::spawn_blocking(move || directory_size(&dir))
            .await
            .map_err(|e| SandflowError::SandboxSetup(format!("Size check failed: {}", e)))?;
        let limit = self.config.max_size_mb.saturating_mul(1024 * 1024);
        debug!(path = %workspace.display(), size_bytes = size, limit_bytes = limit, "Workspace size measured");
        if size > limit {
            return Err(SandflowError::SandboxSetup(format!(
                "Workspace is {} bytes, exceeding the {} MB limit",
                size, self.config.max_size_mb
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Sandbox for FilesystemSandbox {
    async fn setup(&self, source: &SourceDescriptor) -> Result<PathBuf, SandflowError> {
        let workspace = self.workspace_dir().await?;
        info!(source = %source, path = %workspace.display(), "Setting up sandbox");

        let result = match self.materialize(source, &workspace).await {
            Ok(()) => self.enforce_size_limit(&workspace).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            remove_workspace(&workspace).await;
            warn!(source = %source, error = %e, "Sandbox setup failed");
            return Err(e);
        }

        self.set_current(Some(workspace.clone()));
        Ok(workspace)
    }

    async fn teardown(&self, path: &Path) {
        if self.config.auto_cleanup {
            remove_workspace(path).await;
            info!(path = %path.display(), "Sandbox removed");
        } else {
            info!(path = %path.display(), "Sandbox retained (auto_cleanup disabled)");
        }
        if self.current_path().as_deref() == Some(path) {
            self.set_current(None);
        }
    }

    fn current_path(&self) -> Option<PathBuf> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn file_hash(&self, path: &str) -> Result<String, SandflowError> {
        let target = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.resolve(path).await?
        };
        Ok(hash_file(&target).await)
    }

    async fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, SandflowError> {
        let root = self.require_path()?;
        let timeout = timeout.unwrap_or_else(|| self.config.command_timeout());
        debug!(command = %preview(command, 200), "Executing in sandbox");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(SandflowError::CommandTimeout {
                command: preview(command, 100).to_string(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }

    async fn read_file(&self, path: &str) -> Result<String, SandflowError> {
        let target = self.resolve(path).await?;
        if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(SandflowError::FileNotFound(path.to_string()));
        }
        Ok(tokio::fs::read_to_string(&target).await?)
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandflowError> {
        let target = self.resolve(path).await?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        Ok(())
    }

    async fn list_files(&self, pattern: &str) -> Result<Vec<String>, SandflowError> {
        let root = self.require_path()?;
        let compiled = glob::Pattern::new(pattern)
            .map_err(|e| SandflowError::InvalidPath(format!("Invalid glob '{}': {}", pattern, e)))?;
        let match_name_only = !pattern.contains('/');

        tokio::task::spawn_blocking(move || {
            let options = glob::MatchOptions {
                require_literal_separator: true,
                ..Default::default()
            };
            let mut files: Vec<String> = WalkDir::new(&root)
                .min_depth(1)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| {
                    let relative = entry.path().strip_prefix(&root).ok()?;
                    let relative = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    let subject = if match_name_only {
                        entry.file_name().to_string_lossy().into_owned()
                    } else {
                        relative.clone()
                    };
                    compiled.matches_with(&subject, options).then_some(relative)
                })
                .collect();
            files.sort();
            files
        })
        .await
        .map_err(|e| SandflowError::Io(std::io::Error::other(e)))
    }
}

fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Create a fresh directory under `base`, drawing another name whenever the
/// drawn one is already taken.
async fn claim_workspace_dir(
    base: &Path,
    mut next_name: impl FnMut() -> String,
) -> std::io::Result<PathBuf> {
    const ATTEMPTS: usize = 16;
    for _ in 0..ATTEMPTS {
        let candidate = base.join(next_name());
        match tokio::fs::create_dir(&candidate).await {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(path = %candidate.display(), "Workspace name taken, drawing another");
            }
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free workspace name after {} attempts", ATTEMPTS),
    ))
}

async fn remove_workspace(path: &Path) {
    let first = match tokio::fs::remove_dir_all(path).await {
        Ok(()) => return,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => e,
    };

    // Steps may have made directories read-only; restore write access and retry.
    let dir = path.to_path_buf();
    let _ = tokio::task::spawn_blocking(move || make_tree_writable(&dir)).await;
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        warn!(path = %path.display(), error = %e, first_error = %first, "Failed to remove sandbox directory");
    }
}

fn make_tree_writable(root: &Path) {
    for entry in WalkDir::new(root).follow_links(false).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_dir() {
            if let Ok(meta) = entry.metadata() {
                let _ = std::fs::set_permissions(entry.path(), writable_dir_permissions(meta.permissions()));
            }
        }
    }
}

#[cfg(unix)]
fn writable_dir_permissions(perms: std::fs::Permissions) -> std::fs::Permissions {
    use std::os::unix::fs::PermissionsExt;
    std::fs::Permissions::from_mode(perms.mode() | 0o700)
}

#[cfg(not(unix))]
fn writable_dir_permissions(mut perms: std::fs::Permissions) -> std::fs::Permissions {
    perms.set_readonly(false);
    perms
}

/// Recursive copy that keeps file permissions and modification times.
/// Directories keep their mode but stay owner-writable so the workspace can
/// always be cleaned up.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    let mut directories = Vec::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            directories.push((target, entry.metadata()?));
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
            let modified = entry.metadata()?.modified()?;
            std::fs::File::open(&target)?.set_modified(modified)?;
        }
    }

    for (dir, meta) in directories.into_iter().rev() {
        std::fs::set_permissions(&dir, writable_dir_permissions(meta.permissions()))?;
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(link)?, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, _target: &Path) -> std::io::Result<()> {
    warn!(path = %link.display(), "Skipping symlink");
    Ok(())
}

fn directory_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Hands out an independent [`FilesystemSandbox`] per run.
#[derive(Debug, Clone, Default)]
pub struct FilesystemSandboxFactory {
    config: SandboxConfig,
}

impl FilesystemSandboxFactory {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }
}

impl SandboxFactory for FilesystemSandboxFactory {
    fn create(&self) -> Arc<dyn Sandbox> {
        Arc::new(FilesystemSandbox::new(self.config.clone()))
    }
}
