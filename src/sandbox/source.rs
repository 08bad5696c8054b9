use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const REMOTE_PREFIXES: &[&str] = &["http://", "https://", "git@", "ssh://", "git://", "file://"];

/// Where a sandbox workspace is materialized from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawSource", into = "RawSource")]
pub enum SourceDescriptor {
    /// Repository fetched with a shallow clone, optionally at a given ref.
    Remote { url: String, git_ref: Option<String> },
    /// Directory copied recursively into the workspace.
    Local(PathBuf),
    /// Structured descriptor without a repository: an empty workspace.
    Empty,
}

impl SourceDescriptor {
    /// Interpret a plain string: repository URL if it carries a known scheme
    /// or ends in `.git`, local path otherwise.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if is_remote(trimmed) {
            Self::Remote { url: trimmed.to_string(), git_ref: None }
        } else {
            Self::Local(PathBuf::from(trimmed))
        }
    }

    pub fn remote(url: impl Into<String>, git_ref: Option<String>) -> Self {
        Self::Remote { url: url.into(), git_ref }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

impl std::fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote { url, git_ref: Some(r) } => write!(f, "{}@{}", url, r),
            Self::Remote { url, git_ref: None } => write!(f, "{}", url),
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Empty => write!(f, "<empty>"),
        }
    }
}

impl From<&str> for SourceDescriptor {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

fn is_remote(text: &str) -> bool {
    REMOTE_PREFIXES.iter().any(|p| text.starts_with(p)) || text.ends_with(".git")
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawSource {
    Text(String),
    Structured {
        #[serde(default, alias = "repoUrl", skip_serializing_if = "Option::is_none")]
        repo_url: Option<String>,
        #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
        git_ref: Option<String>,
    },
}

impl From<RawSource> for SourceDescriptor {
    fn from(raw: RawSource) -> Self {
        match raw {
            RawSource::Text(text) => Self::parse(&text),
            RawSource::Structured { repo_url: Some(url), git_ref } => Self::Remote { url, git_ref },
            RawSource::Structured { repo_url: None, .. } => Self::Empty,
        }
    }
}

impl From<SourceDescriptor> for RawSource {
    fn from(source: SourceDescriptor) -> Self {
        match source {
            SourceDescriptor::Remote { url, git_ref } => RawSource::Structured { repo_url: Some(url), git_ref },
            SourceDescriptor::Local(path) => RawSource::Text(path.to_string_lossy().into_owned()),
            SourceDescriptor::Empty => RawSource::Structured { repo_url: None, git_ref: None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_remote_schemes() {
        for url in [
            "https://github.com/org/repo",
            "http://host/repo",
            "git@github.com:org/repo",
            "ssh://git@host/repo",
            "git://host/repo",
            "file:///srv/repo",
            "/srv/mirror/repo.git",
        ] {
            assert!(SourceDescriptor::parse(url).is_remote(), "{} should be remote", url);
        }
    }

    #[test]
    fn test_parse_local_paths() {
        assert_eq!(
            SourceDescriptor::parse("./project"),
            SourceDescriptor::Local(PathBuf::from("./project"))
        );
        assert!(!SourceDescriptor::parse("/home/user/code").is_remote());
    }

    #[test]
    fn test_deserialize_structured() {
        let source: SourceDescriptor =
            serde_json::from_value(json!({"repoUrl": "https://h/r.git", "ref": "v1.2"})).unwrap();
        assert_eq!(source, SourceDescriptor::remote("https://h/r.git", Some("v1.2".into())));

        let source: SourceDescriptor = serde_json::from_value(json!({"repo_url": "https://h/r"})).unwrap();
        assert_eq!(source, SourceDescriptor::remote("https://h/r", None));
    }

    #[test]
    fn test_deserialize_without_repo_is_empty() {
        let source: SourceDescriptor = serde_json::from_value(json!({})).unwrap();
        assert_eq!(source, SourceDescriptor::Empty);
    }

    #[test]
    fn test_deserialize_plain_string() {
        let source: SourceDescriptor = serde_json::from_value(json!("./local")).unwrap();
        assert_eq!(source, SourceDescriptor::Local(PathBuf::from("./local")));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            SourceDescriptor::remote("https://h/r", Some("main".into())).to_string(),
            "https://h/r@main"
        );
        assert_eq!(SourceDescriptor::Empty.to_string(), "<empty>");
    }
}
