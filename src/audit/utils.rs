use std::path::Path;

use crate::errors::SandflowError;

/// Atomic file write: write to a sibling temp file, then rename over `path`.
pub async fn atomic_write(path: &Path, content: &str) -> Result<(), SandflowError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// File-name-safe form of a step name.
pub fn safe_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        atomic_write(&path, "one").await.unwrap();
        atomic_write(&path, "two").await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "two");
        assert!(!dir.path().join("session.json.tmp").exists());
    }

    #[test]
    fn test_safe_file_stem() {
        assert_eq!(safe_file_stem("clone-repo_1.x"), "clone-repo_1.x");
        assert_eq!(safe_file_stem("a/b c"), "a_b_c");
    }
}
