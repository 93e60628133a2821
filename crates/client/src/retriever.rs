//! Download and persist the artifact a finished job produced.
//!
//! The retriever is stateless: it holds no job reference and caches
//! nothing, so a failed fetch can simply be retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use xlproc_core::types::ResultHandle;

use crate::backend::JobBackend;
use crate::error::ClientError;

/// Prefix of the local file name an artifact is saved under.
pub const SAVED_NAME_PREFIX: &str = "processed_";

/// A downloaded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File name on the export route.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    /// Local file name: `processed_<file_name>`.
    pub fn suggested_name(&self) -> String {
        format!("{SAVED_NAME_PREFIX}{}", self.file_name)
    }
}

pub struct ResultRetriever {
    backend: Arc<dyn JobBackend>,
}

impl ResultRetriever {
    pub fn new(backend: Arc<dyn JobBackend>) -> Self {
        Self { backend }
    }

    /// Fetch the artifact behind `handle`.
    ///
    /// Fails with [`ClientError::NoResultAvailable`] when there is no
    /// handle or it has no usable file name, and with
    /// [`ClientError::RetrievalFailed`] when the download fails.
    pub async fn fetch(&self, handle: Option<&ResultHandle>) -> Result<Artifact, ClientError> {
        let file_name = handle
            .and_then(ResultHandle::file_name)
            .ok_or(ClientError::NoResultAvailable)?;

        let bytes = self.backend.export(file_name).await.map_err(|e| {
            tracing::warn!(file = %file_name, error = %e, "Artifact download failed");
            ClientError::RetrievalFailed(e.to_string())
        })?;

        tracing::info!(file = %file_name, size = bytes.len(), "Artifact downloaded");
        Ok(Artifact {
            file_name: file_name.to_string(),
            bytes,
        })
    }

    /// Write `artifact` into `dir` under its suggested name, replacing any
    /// existing file. Returns the written path.
    pub async fn save(&self, artifact: &Artifact, dir: &Path) -> Result<PathBuf, ClientError> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            ClientError::RetrievalFailed(format!("Cannot create {}: {e}", dir.display()))
        })?;

        let path = dir.join(artifact.suggested_name());
        tokio::fs::write(&path, &artifact.bytes).await.map_err(|e| {
            ClientError::RetrievalFailed(format!("Cannot write {}: {e}", path.display()))
        })?;

        tracing::info!(path = %path.display(), "Artifact saved");
        Ok(path)
    }

    /// [`fetch`](Self::fetch) then [`save`](Self::save).
    pub async fn fetch_and_save(
        &self,
        handle: Option<&ResultHandle>,
        dir: &Path,
    ) -> Result<PathBuf, ClientError> {
        let artifact = self.fetch(handle).await?;
        self.save(&artifact, dir).await
    }
}
