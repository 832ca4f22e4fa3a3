use beach::config::CliArgs;
use clap::Parser;
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse();
    match beach::run(&args).await {
        Ok(stats) => {
            println!(
                "Exported {} rows ({} skipped) into {}",
                stats.rows_exported,
                stats.rows_skipped,
                args.output_dir.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Export of {:?} failed: {}", args.command, e);
            ExitCode::FAILURE
        }
    }
}
