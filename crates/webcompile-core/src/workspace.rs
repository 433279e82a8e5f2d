//! Host directories mounted into sandboxes.
//!
//! Every sandbox gets its own directory under the storage root, named
//! `<date><unique-id>`. The directory holds the submitted source and any
//! build artifacts and is deleted together with the sandbox.

use crate::error::CoreError;
use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Creates and removes per-sandbox workspace directories.
#[derive(Debug, Clone)]
pub struct WorkspaceAllocator {
    root: PathBuf,
}

impl WorkspaceAllocator {
    /// Create an allocator rooted at `root`.
    ///
    /// The root itself is created lazily on the first `create()`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, uniquely named, world-writable workspace directory.
    ///
    /// # Errors
    ///
    /// Fails if the storage root is unwritable or the generated name already
    /// exists. Neither case is retried here.
    pub async fn create(&self) -> Result<PathBuf, CoreError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let name = format!(
            "{}{}",
            Utc::now().format("%Y-%m-%d"),
            Uuid::new_v4().simple()
        );
        let path = self.root.join(name);

        // create_dir (not create_dir_all) so a name collision is an error
        tokio::fs::create_dir(&path).await.map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Failed to create workspace");
            e
        })?;

        // The sandbox user is not the host user
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::Permissions::from_mode(0o777);
            if let Err(e) = tokio::fs::set_permissions(&path, mode).await {
                return Err(self.abandon(&path, e).await);
            }
        }

        tracing::debug!(path = %path.display(), "Workspace created");
        Ok(path)
    }

    /// Remove a half-prepared workspace and hand back the error that stopped it.
    #[cfg_attr(not(unix), allow(dead_code))]
    async fn abandon(&self, path: &Path, err: std::io::Error) -> CoreError {
        tracing::warn!(path = %path.display(), error = %err, "Failed to prepare workspace");
        self.destroy(path).await;
        CoreError::Io(err)
    }

    /// Recursively remove a workspace. Failures are logged and swallowed.
    pub async fn destroy(&self, path: &Path) {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::trace!(path = %path.display(), "Workspace already gone");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove workspace");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_makes_unique_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = WorkspaceAllocator::new(tmp.path().join("runs"));

        let a = allocator.create().await.unwrap();
        let b = allocator.create().await.unwrap();

        assert_ne!(a, b);
        assert!(a.is_dir());
        assert!(b.is_dir());
        assert!(a.starts_with(allocator.root()));

        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        // yyyy-mm-dd followed by 32 hex chars
        assert_eq!(name.len(), 10 + 32);
        assert_eq!(&name[4..5], "-");
    }

    #[tokio::test]
    async fn test_destroy_removes_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = WorkspaceAllocator::new(tmp.path());

        let path = allocator.create().await.unwrap();
        tokio::fs::write(path.join("code.cs"), "class X {}")
            .await
            .unwrap();

        allocator.destroy(&path).await;
        assert!(!path.exists());

        // second destroy is a quiet no-op
        allocator.destroy(&path).await;
    }

    #[tokio::test]
    async fn test_abandon_removes_partial_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = WorkspaceAllocator::new(tmp.path());
        let path = allocator.create().await.unwrap();

        let err = allocator
            .abandon(&path, std::io::Error::from(std::io::ErrorKind::PermissionDenied))
            .await;

        assert!(matches!(
            err,
            CoreError::Io(ref e) if e.kind() == std::io::ErrorKind::PermissionDenied
        ));
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_create_fails_when_root_is_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "not a dir").unwrap();

        let allocator = WorkspaceAllocator::new(&blocker);
        assert!(allocator.create().await.is_err());
    }
}
