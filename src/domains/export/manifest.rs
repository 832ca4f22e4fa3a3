use crate::domains::export::types::ManifestColumn;
use crate::errors::{ExportError, ExportResult};
use std::fs::File;
use std::path::{Path, PathBuf};

/// File name of the manifest inside the output directory
pub const MANIFEST_FILE_NAME: &str = "items.csv";

/// Append-only CSV manifest (`items.csv`).
///
/// The header is written on creation. Rows are buffered by the csv writer
/// and reach the disk on `flush`, which also syncs the file.
pub struct ManifestWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    width: usize,
    rows_written: usize,
}

impl ManifestWriter {
    /// Create (or truncate) the manifest and write its header row
    pub fn create(path: &Path, columns: &[ManifestColumn]) -> ExportResult<Self> {
        let file = File::create(path).map_err(|e| ExportError::io(path, e))?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b',')
            .quote(b'"')
            .terminator(csv::Terminator::CRLF)
            .from_writer(file);

        writer.write_record(columns.iter().map(|c| c.header()))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            width: columns.len(),
            rows_written: 0,
        })
    }

    pub fn append(&mut self, record: &[String]) -> ExportResult<()> {
        debug_assert_eq!(record.len(), self.width, "manifest record width mismatch");
        self.writer.write_record(record)?;
        self.rows_written += 1;
        Ok(())
    }

    /// Push buffered rows to the file and sync it to disk
    pub fn flush(&mut self) -> ExportResult<()> {
        self.writer.flush().map_err(|e| ExportError::io(&self.path, e))?;
        self.writer
            .get_ref()
            .sync_data()
            .map_err(|e| ExportError::io(&self.path, e))?;
        Ok(())
    }

    #[cfg(test)]
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close, returning the number of data rows
    pub fn finish(mut self) -> ExportResult<usize> {
        self.flush()?;
        Ok(self.rows_written)
    }
}
