use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::cli::commands::HashArgs;
use crate::errors::SandflowError;
use crate::hashing::hash_file;

/// Prints `<digest>  <path>` per file; directories are walked in name order.
pub async fn handle_hash(args: HashArgs) -> Result<(), SandflowError> {
    for arg in &args.paths {
        let path = PathBuf::from(arg);
        if !path.exists() {
            return Err(SandflowError::FileNotFound(arg.clone()));
        }
        for file in files_under(&path)? {
            println!("{}  {}", hash_file(&file).await, file.display());
        }
    }
    Ok(())
}

fn files_under(path: &Path) -> Result<Vec<PathBuf>, SandflowError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| SandflowError::Io(e.into()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_under_directory_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("sub/c.txt"), "c").unwrap();

        let files = files_under(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub/c.txt"]);
    }

    #[test]
    fn test_files_under_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x");
        std::fs::write(&file, "x").unwrap();
        assert_eq!(files_under(&file).unwrap(), vec![file]);
    }
}
