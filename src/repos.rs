//! Repository path resolution and on-demand bare repository creation.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::process::Command;

/// Resolves repository names to directories under a fixed root.
///
/// Names come straight from the URL and may contain `/`; they are never
/// URL-decoded. Containment rests on rejecting `..` segments up front and on
/// the root-prefix check after lexical normalization.
#[derive(Debug, Clone)]
pub struct RepoStore {
    root: PathBuf,
}

impl RepoStore {
    pub fn new(root: PathBuf) -> Self {
        RepoStore {
            root: normalize(&root),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a repository name to its directory, refusing anything that
    /// would land outside the root.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() {
            bail!("empty repository name");
        }
        if name.split('/').any(|segment| segment == "..") {
            bail!("repository name {name:?} contains a parent segment");
        }
        if name.chars().any(char::is_control) {
            bail!("repository name contains control characters");
        }

        let path = normalize(&self.root.join(name));
        if !path.starts_with(&self.root) {
            bail!("repository path escapes the root directory");
        }
        Ok(path)
    }

    /// Whether the repository directory exists.
    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    /// Create a bare repository at `path` via `git init --bare`.
    pub async fn create(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?;

        let output = Command::new("git")
            .arg("init")
            .arg("--bare")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("failed to run git init --bare")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "git init --bare {} failed: {}",
                path.display(),
                stderr.trim()
            );
        }

        tracing::info!(path = %path.display(), "created bare repository");
        Ok(())
    }
}

/// Lexical normalization: resolves `.` and `..` components without touching
/// the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // An absolute path cannot go above its root.
                if !out.pop() && !out.has_root() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RepoStore {
        RepoStore::new(PathBuf::from("/srv/repos"))
    }

    #[test]
    fn resolves_plain_and_nested_names() {
        let store = store();
        assert_eq!(
            store.resolve("project.git").unwrap(),
            PathBuf::from("/srv/repos/project.git")
        );
        assert_eq!(
            store.resolve("team/project").unwrap(),
            PathBuf::from("/srv/repos/team/project")
        );
    }

    #[test]
    fn rejects_parent_segments_before_normalization() {
        let store = store();
        assert!(store.resolve("..").is_err());
        assert!(store.resolve("../outside").is_err());
        assert!(store.resolve("a/../../outside").is_err());
        assert!(store.resolve("a/..").is_err());
    }

    #[test]
    fn rejects_control_characters_and_empty_names() {
        let store = store();
        assert!(store.resolve("").is_err());
        assert!(store.resolve("re\0po").is_err());
        assert!(store.resolve("re\npo").is_err());
    }

    #[test]
    fn dots_inside_names_are_allowed() {
        let store = store();
        assert_eq!(
            store.resolve("dotted..name").unwrap(),
            PathBuf::from("/srv/repos/dotted..name")
        );
    }

    #[test]
    fn normalize_collapses_cur_and_parent_dirs() {
        assert_eq!(
            normalize(Path::new("/a/b/./c/../d")),
            PathBuf::from("/a/b/d")
        );
        assert_eq!(normalize(Path::new("/a/../../b")), PathBuf::from("/b"));
    }
}
