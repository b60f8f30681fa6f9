//! Request-scoped scratch storage for uploaded bytes.
//!
//! [`ScratchStore::store`] persists an upload and hands back a [`ScratchHandle`];
//! [`ScratchGuard`] owns that handle for the rest of the request and releases it from `Drop`,
//! so the file is removed on every exit path, including cancellation of the request future.

use super::types::ScratchError;
use crate::metrics::PipelineMetrics;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Opaque reference to an upload persisted for the current request.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScratchHandle {
    path: PathBuf,
}

impl ScratchHandle {
    /// Wrap a path produced by a store.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Location of the stored bytes.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Persists uploads for the lifetime of one request.
#[async_trait]
pub trait ScratchStore: Send + Sync {
    /// Persist `bytes` and return a handle to them.
    async fn store(&self, bytes: &[u8]) -> Result<ScratchHandle, ScratchError>;

    /// Remove the stored bytes. Called exactly once per handle.
    fn release(&self, handle: ScratchHandle) -> Result<(), ScratchError>;
}

/// Scratch store writing each upload to its own file in a directory.
pub struct TempDirStore {
    dir: PathBuf,
}

impl TempDirStore {
    /// Use `dir` for uploads, creating it when missing.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ScratchError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(ScratchError::Write)?;
        Ok(Self { dir })
    }

    /// Use the operating system's temporary directory.
    pub fn system() -> Self {
        Self {
            dir: std::env::temp_dir(),
        }
    }

    /// Directory uploads are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ScratchStore for TempDirStore {
    async fn store(&self, bytes: &[u8]) -> Result<ScratchHandle, ScratchError> {
        let dir = self.dir.clone();
        let bytes = bytes.to_vec();
        let path = tokio::task::spawn_blocking(move || -> Result<PathBuf, ScratchError> {
            let mut file = tempfile::Builder::new()
                .prefix("upload-")
                .tempfile_in(&dir)
                .map_err(ScratchError::Write)?;
            file.write_all(&bytes).map_err(ScratchError::Write)?;
            file.as_file().sync_all().map_err(ScratchError::Write)?;
            persist(file)
        })
        .await
        .map_err(|error| ScratchError::Task(error.to_string()))??;

        tracing::debug!(path = %path.display(), "Upload stored");
        Ok(ScratchHandle::new(path))
    }

    fn release(&self, handle: ScratchHandle) -> Result<(), ScratchError> {
        std::fs::remove_file(&handle.path).map_err(|source| ScratchError::Remove {
            path: handle.path.clone(),
            source,
        })?;
        tracing::debug!(path = %handle.path.display(), "Upload released");
        Ok(())
    }
}

/// Detach the file from `tempfile`'s own cleanup; the guard owns deletion from here on.
fn persist(file: NamedTempFile) -> Result<PathBuf, ScratchError> {
    file.into_temp_path()
        .keep()
        .map_err(|error| ScratchError::Write(error.error))
}

/// Releases a scratch handle exactly once when dropped.
pub struct ScratchGuard {
    store: Arc<dyn ScratchStore>,
    metrics: Arc<PipelineMetrics>,
    handle: ScratchHandle,
}

impl ScratchGuard {
    /// Take ownership of `handle` on behalf of the current request.
    pub fn new(
        store: Arc<dyn ScratchStore>,
        metrics: Arc<PipelineMetrics>,
        handle: ScratchHandle,
    ) -> Self {
        Self {
            store,
            metrics,
            handle,
        }
    }

    /// Handle guarded by this value.
    pub fn handle(&self) -> &ScratchHandle {
        &self.handle
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        // Release is one unlink of a single scratch file, done inline on the runtime thread.
        // Drop cannot await, and a detached blocking task would not run when the runtime is
        // shutting down or the request is being cancelled.
        let handle = std::mem::take(&mut self.handle);
        if let Err(error) = self.store.release(handle) {
            self.metrics.record_cleanup_failure();
            tracing::warn!(error = %error, "Failed to release scratch file");
        }
    }
}
