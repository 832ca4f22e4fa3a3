mod error;

pub use error::{ConfigError, DbError, ExportError};

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;

/// Result type for configuration resolution
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for export operations
pub type ExportResult<T> = Result<T, ExportError>;
