//! Scoped working directory for one run.
//!
//! Holds the downloaded source (if any) and every rendered page image.
//! [`WorkDir::finish`] releases it explicitly and reports cleanup failures;
//! if the run bails out early the `Drop` impl releases it instead, so no
//! path out of the orchestrator leaks a directory when cleanup is enabled.

use crate::error::PagemarkError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

const PREFIX: &str = "pagemark-";

/// How the directory was released.
#[derive(Debug)]
pub enum Released {
    Removed,
    Kept(PathBuf),
    CleanupFailed(std::io::Error),
}

pub struct WorkDir {
    dir: Option<TempDir>,
    cleanup: bool,
}

impl WorkDir {
    /// Create a fresh directory under `root` (the system temp dir if None).
    pub async fn create(root: Option<&Path>, cleanup: bool) -> Result<Self, PagemarkError> {
        let root = root.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);

        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| PagemarkError::WorkDirFailed {
                root: root.clone(),
                source,
            })?;

        let dir = tempfile::Builder::new()
            .prefix(PREFIX)
            .tempdir_in(&root)
            .map_err(|source| PagemarkError::WorkDirFailed { root, source })?;

        debug!("Working directory: {}", dir.path().display());
        Ok(Self {
            dir: Some(dir),
            cleanup,
        })
    }

    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(d) => d.path(),
            None => Path::new(""),
        }
    }

    /// Release the directory according to the cleanup setting.
    pub async fn finish(mut self) -> Released {
        let Some(dir) = self.dir.take() else {
            return Released::Removed;
        };

        if !self.cleanup {
            return Released::Kept(dir.keep());
        }

        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(Ok(())) => Released::Removed,
            Ok(Err(e)) => {
                warn!("Failed to remove working directory: {}", e);
                Released::CleanupFailed(e)
            }
            Err(e) => Released::CleanupFailed(std::io::Error::other(e.to_string())),
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if self.cleanup {
                if let Err(e) = dir.close() {
                    warn!("Failed to remove working directory: {}", e);
                }
            } else {
                let kept = dir.keep();
                debug!("Keeping working directory: {}", kept.display());
            }
        }
    }
}
