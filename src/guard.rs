//! Resolution of caller-supplied file names beneath a storage root.
//!
//! Every identifier is checked lexically first (only plain path components
//! are allowed) and then canonically: the resolved path, symlinks followed,
//! must still live under the canonical root. Any failure is reported as
//! [`StreamError::NotFound`] so that probing reveals nothing about the
//! layout outside the root.

use std::path::{Component, Path, PathBuf};

use crate::error::{StreamError, StreamResult};

/// A directory whose descendants may be served.
#[derive(Debug, Clone)]
pub struct StorageRoot {
    root: PathBuf,
}

/// A validated identifier and the canonical path it resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocator {
    pub identifier: String,
    pub path: PathBuf,
}

impl StorageRoot {
    /// Creates `dir` if needed and pins its canonical form.
    pub async fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let root = tokio::fs::canonicalize(dir).await?;
        Ok(StorageRoot { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolves `identifier` to a path under this root.
    ///
    /// Nothing beneath the root is opened or stat'ed before the lexical check
    /// passes.
    pub async fn locate(&self, identifier: &str) -> StreamResult<ResourceLocator> {
        if !is_plain_relative(identifier) {
            tracing::warn!(identifier, "rejected unsafe path");
            return Err(StreamError::NotFound);
        }

        let root = self.root.clone();
        let candidate = root.join(identifier);
        let canonical = tokio::task::spawn_blocking(move || candidate.canonicalize())
            .await
            .map_err(|e| StreamError::io("canonicalize task", std::io::Error::other(e)))?;

        let path = match canonical {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(identifier, "no such file");
                return Err(StreamError::NotFound);
            }
            Err(e) => {
                tracing::debug!(identifier, error = %e, "failed to canonicalize");
                return Err(StreamError::NotFound);
            }
        };

        if !path.starts_with(&root) {
            tracing::warn!(identifier, "resolved path escapes storage root");
            return Err(StreamError::NotFound);
        }

        Ok(ResourceLocator { identifier: identifier.to_string(), path })
    }
}

/// Only `Normal` components: no `..`, `.`, root or drive prefix.
fn is_plain_relative(identifier: &str) -> bool {
    if identifier.is_empty() || identifier.contains('\0') || identifier.contains('\\') {
        return false;
    }
    Path::new(identifier)
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    async fn root_with_file() -> (tempfile::TempDir, StorageRoot) {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("videos/nested")).await.unwrap();
        tokio::fs::write(dir.path().join("videos/clip.mp4"), b"clip").await.unwrap();
        tokio::fs::write(dir.path().join("videos/nested/deep.mp4"), b"deep").await.unwrap();
        tokio::fs::write(dir.path().join("secret.txt"), b"secret").await.unwrap();
        let root = StorageRoot::open(dir.path().join("videos")).await.unwrap();
        (dir, root)
    }

    #[tokio::test]
    async fn test_locate_existing() {
        let (_dir, root) = root_with_file().await;

        let located = root.locate("clip.mp4").await.unwrap();
        assert_eq!("clip.mp4", located.identifier);
        assert!(located.path.starts_with(root.path()));
        assert!(located.path.ends_with("clip.mp4"));

        let nested = root.locate("nested/deep.mp4").await.unwrap();
        assert!(nested.path.ends_with("nested/deep.mp4"));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, root) = root_with_file().await;

        for identifier in [
            "../secret.txt",
            "nested/../../secret.txt",
            "./clip.mp4",
            "/etc/passwd",
            "..",
            "",
            "..\\secret.txt",
        ] {
            assert_matches!(root.locate(identifier).await, Err(StreamError::NotFound), "{identifier}");
        }
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let (_dir, root) = root_with_file().await;
        assert_matches!(root.locate("missing.mp4").await, Err(StreamError::NotFound));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let (dir, root) = root_with_file().await;
        symlink(dir.path().join("secret.txt"), dir.path().join("videos/escape.mp4")).unwrap();

        assert_matches!(root.locate("escape.mp4").await, Err(StreamError::NotFound));
    }

    #[tokio::test]
    async fn test_open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = StorageRoot::open(dir.path().join("a/b")).await.unwrap();
        assert!(root.path().is_dir());
    }
}
