//! Request-scoped scratch directories.
//!
//! A [`ScratchWorkspace`] owns a uniquely named temporary directory and
//! removes it when dropped, whichever way the owning request finishes.  A
//! failed removal is logged and otherwise ignored so it never replaces the
//! request's own result.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::{debug, error};

pub const WORKSPACE_PREFIX: &str = "whitelist_";

#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchWorkspace {
    /// Create a new workspace under `root`, or under the system temp dir when
    /// `root` is `None`.
    pub async fn create(root: Option<&Path>) -> Result<Self> {
        if let Some(root) = root {
            tokio::fs::create_dir_all(root)
                .await
                .with_context(|| format!("failed to create workspace root: {}", root.display()))?;
        }
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .context("failed to create scratch workspace")?;

        let path = dir.path().to_path_buf();
        debug!(workspace = %path.display(), "scratch workspace created");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the workspace on the blocking pool, reporting any failure to
    /// the caller.  A cloned tree can be large.
    pub async fn close(mut self) -> std::io::Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || dir.close())
            .await
            .map_err(std::io::Error::other)?
    }
}

impl Drop for ScratchWorkspace {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => debug!(workspace = %self.path.display(), "scratch workspace removed"),
            Err(e) => error!(
                workspace = %self.path.display(),
                error = %e,
                "failed to remove scratch workspace"
            ),
        }
    }
}
