pub mod types;
pub mod repository;
pub mod manifest;
pub mod payload;
pub mod service;

pub use service::{Exporter, ExportOptions};
pub use repository::{ExportRepository, PgExportRepository};
pub use manifest::{ManifestWriter, MANIFEST_FILE_NAME};
pub use payload::PayloadWriter;
pub use types::{ExportKind, ExportRow, ExportStats, PageCursor, PaginationMode};
