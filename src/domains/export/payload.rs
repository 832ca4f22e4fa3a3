use crate::domains::export::types::PayloadFile;
use crate::errors::{ExportError, ExportResult};
use std::path::{Path, PathBuf};

/// Writes per-row payload files under the output directory
pub struct PayloadWriter {
    root: PathBuf,
    files_written: usize,
    bytes_written: usize,
}

impl PayloadWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files_written: 0,
            bytes_written: 0,
        }
    }

    /// Create the output directory (and the kind's subdirectory, if any)
    pub async fn prepare(&self, subdir: Option<&str>) -> ExportResult<()> {
        let dir = match subdir {
            Some(subdir) => self.root.join(subdir),
            None => self.root.clone(),
        };
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ExportError::io(&dir, e))
    }

    /// Write one file, replacing any previous contents
    pub async fn write(&mut self, payload: &PayloadFile) -> ExportResult<()> {
        let path = self.root.join(&payload.relative_path);
        tokio::fs::write(&path, &payload.contents)
            .await
            .map_err(|e| ExportError::io(&path, e))?;

        log::debug!("Wrote {} ({} bytes)", path.display(), payload.contents.len());
        self.files_written += 1;
        self.bytes_written += payload.contents.len();
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_written(&self) -> usize {
        self.files_written
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}
