// Public modules
pub mod config;
pub mod domains;
pub mod errors;
pub mod globals;

use config::{CliArgs, ExportConfig};
use domains::export::{ExportOptions, ExportStats, Exporter, PgExportRepository};
use errors::ExportResult;

/// Resolve configuration, then run one export over a single database connection.
///
/// The connection is closed before returning, whether or not the export
/// succeeded.
pub async fn run(args: &CliArgs) -> ExportResult<ExportStats> {
    let config = globals::initialize(ExportConfig::resolve(args)?)?;
    log::info!(
        "Connecting to {} (page_size={}, pagination={:?})",
        config.redacted_database_url(),
        config.page_size,
        config.pagination
    );

    let repo = PgExportRepository::connect(&config.database_url).await?;
    let options = ExportOptions {
        page_size: config.page_size,
        pagination: config.pagination,
    };
    let result = Exporter::new(&repo, options)
        .export(args.command, &args.output_dir)
        .await;
    repo.close().await;

    result
}
