//! Per-request scratch areas.
//!
//! Every request gets its own directory under the scratch root, named from
//! the request id plus a random suffix. Nothing a client sends ends up in a
//! path. The directory and everything in it is removed when the area is
//! released, or when it is dropped on an early return, panic or cancelled
//! task.
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

const AREA_PREFIX: &str = "req-";

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to create scratch area under {root}: {source}")]
    Create {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to persist upload: {0}")]
    Persist(#[source] io::Error),

    #[error("upload truncated: {0}")]
    Truncated(String),
}

#[derive(Debug, Clone)]
pub struct ScratchManager {
    root: PathBuf,
}

impl ScratchManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root and remove areas left behind by a previous process.
    ///
    /// A killed process never runs its destructors, so stale areas can only be
    /// collected at the next start. Returns how many were removed.
    pub async fn prepare(&self) -> Result<usize, ResourceError> {
        let create_err = |source| ResourceError::Create {
            root: self.root.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.root).await.map_err(create_err)?;

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(create_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(create_err)? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(AREA_PREFIX) {
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), "failed to remove stale scratch area: {e}"),
            }
        }

        if removed > 0 {
            info!(removed, root = %self.root.display(), "removed stale scratch areas");
        }
        Ok(removed)
    }

    /// Allocate a fresh, exclusively-owned area for one request.
    pub async fn acquire(&self, request_id: Uuid) -> Result<ScratchArea, ResourceError> {
        let root = self.root.clone();
        let prefix = format!("{AREA_PREFIX}{request_id}-");

        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(&prefix).tempdir_in(&root)
        })
        .await
        .map_err(|e| io::Error::other(format!("scratch task join error: {e}")))
        .and_then(|res| res)
        .map_err(|source| ResourceError::Create {
            root: self.root.clone(),
            source,
        })?;

        debug!(%request_id, path = %dir.path().display(), "scratch area acquired");
        Ok(ScratchArea {
            dir: Some(dir),
            request_id,
        })
    }
}

/// A request-exclusive directory, removed on release or drop.
#[derive(Debug)]
pub struct ScratchArea {
    dir: Option<TempDir>,
    request_id: Uuid,
}

impl ScratchArea {
    pub fn path(&self) -> &Path {
        self.dir
            .as_ref()
            .map(TempDir::path)
            .unwrap_or_else(|| Path::new(""))
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Write `bytes` to `file_name` inside the area and return the full path.
    ///
    /// `file_name` is chosen by the server and must be a bare file name.
    pub async fn persist(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, ResourceError> {
        if file_name.is_empty() || file_name.contains(['/', '\\']) || file_name.starts_with('.') {
            return Err(ResourceError::Persist(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to persist to '{file_name}'"),
            )));
        }

        let path = self.path().join(file_name);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(ResourceError::Persist)?;
        file.write_all(bytes).await.map_err(ResourceError::Persist)?;
        file.flush().await.map_err(ResourceError::Persist)?;

        debug!(request_id = %self.request_id, bytes = bytes.len(), path = %path.display(), "upload persisted");
        Ok(path)
    }

    /// Remove the area. Failures are logged, never returned: the request's
    /// outcome has already been decided by the time cleanup runs.
    pub async fn release(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let request_id = self.request_id;
        let path = dir.path().to_path_buf();

        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(Ok(())) => debug!(%request_id, "scratch area released"),
            Ok(Err(e)) => warn!(%request_id, path = %path.display(), "failed to remove scratch area: {e}"),
            Err(e) => warn!(%request_id, path = %path.display(), "scratch cleanup task failed: {e}"),
        }
    }
}

impl Drop for ScratchArea {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            debug!(request_id = %self.request_id, "scratch area dropped without release, removing");
            if let Err(e) = dir.close() {
                warn!(request_id = %self.request_id, "failed to remove scratch area: {e}");
            }
        }
    }
}
