use std::path::Path;

use tempfile::TempDir;
use tracing::{debug, warn};

use super::ExecError;

/// Per-run directory (`run-*` under the scratch dir), removed when dropped.
#[derive(Debug)]
pub(crate) struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub(crate) async fn create(parent: &Path) -> Result<Self, ExecError> {
        let scratch_err = |source| ExecError::Scratch {
            path: parent.to_path_buf(),
            source,
        };
        tokio::fs::create_dir_all(parent).await.map_err(scratch_err)?;
        let dir = tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(parent)
            .map_err(scratch_err)?;
        Ok(Self { dir })
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, logging failures that `Drop` would swallow.
    pub(crate) fn remove(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!(path = %path.display(), "removed run directory"),
            Err(err) => warn!(path = %path.display(), error = %err, "failed to remove run directory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::tokio_timeout_test]
    async fn directory_is_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(parent.path()).await.unwrap();
        let path = scratch.path().to_path_buf();
        std::fs::write(path.join("main.py"), "print(1)\n").unwrap();
        assert!(path.is_dir());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("run-"));

        drop(scratch);
        assert!(!path.exists());
    }

    #[test_timeout::tokio_timeout_test]
    async fn remove_deletes_contents_and_missing_parent_is_created() {
        let parent = tempfile::tempdir().unwrap();
        let nested = parent.path().join("not-yet");
        let scratch = ScratchDir::create(&nested).await.unwrap();
        let path = scratch.path().to_path_buf();
        std::fs::write(path.join("Main.java"), "class Main {}\n").unwrap();

        scratch.remove();
        assert!(!path.exists());
        assert!(nested.is_dir());
    }
}
