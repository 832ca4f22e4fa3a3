use crate::config::ExportConfig;
use crate::errors::{ConfigError, ConfigResult};
use once_cell::sync::OnceCell;

// Process-wide configuration, written once at startup
static CONFIG: OnceCell<ExportConfig> = OnceCell::new();

/// Store the resolved configuration. Fails if called twice.
pub fn initialize(config: ExportConfig) -> ConfigResult<&'static ExportConfig> {
    CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    get_config()
}

/// Get the configuration stored by `initialize`
pub fn get_config() -> ConfigResult<&'static ExportConfig> {
    CONFIG.get().ok_or(ConfigError::NotInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::export::types::PaginationMode;

    #[test]
    fn test_initialize_once() {
        let config = ExportConfig {
            database_url: "postgres://localhost/news".to_string(),
            page_size: 50,
            pagination: PaginationMode::Keyset,
        };
        let stored = initialize(config.clone()).unwrap();
        assert_eq!(stored, &config);
        assert_eq!(get_config().unwrap().page_size, 50);
        assert!(matches!(initialize(config), Err(ConfigError::AlreadyInitialized)));
    }
}
