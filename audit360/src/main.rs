//! audit360 - Yandex 360 audit log export tool
//!
//! Downloads new mail and disk audit events and appends them to per-day CSV files
use api360_client::{Api360Client, Api360Config};
use audit360::cli::{self, Commands};
use audit360::{Result, Settings, logging, pipeline};
use clap::Parser;
use log::{debug, error, info};
use secrecy::ExposeSecret;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let args = cli::Cli::parse();

    if args.command == Some(Commands::HelpEnv) {
        cli::print_environment_variables();
        return ExitCode::SUCCESS;
    }

    // Loaded before the logger so RUST_LOG may come from .env
    let env_file = load_env_file(args.env_file.as_deref());

    if let Err(e) = logging::init(args.verbose, args.log_file.as_deref()) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    info!("audit360 - Yandex 360 audit log export");

    let code = match run(&args, env_file).await {
        Ok(true) => {
            info!("Export finished");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            error!("Export finished with errors");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    };

    logging::flush();
    code
}

/// Load settings, build the client and export every requested category
async fn run(args: &cli::Cli, env_file: Result<Option<PathBuf>>) -> Result<bool> {
    match env_file? {
        Some(path) => debug!("Loaded environment from {}", path.display()),
        None => debug!("No .env file found"),
    }

    let settings = Settings::from_env()?;
    info!("Organization: {}", settings.organization_id);
    info!("  Mail catalog: {}", settings.mail_dir.display());
    info!("  Disk catalog: {}", settings.disk_dir.display());

    let mut config = Api360Config::new(settings.token().expose_secret().to_string())
        .with_base_url(args.api_url.as_str())
        .with_timeouts(args.connect_timeout, args.request_timeout)
        .with_retry_config(args.retry_config());
    if let Some(proxy) = &args.proxy {
        info!("Using proxy {proxy}");
        config = config.with_proxy(proxy.as_str());
    }
    let client = Api360Client::new(config)?;

    let summary = pipeline::run(
        &client,
        &settings,
        &args.categories(),
        &args.fetch_options(),
    )
    .await;

    for report in &summary.reports {
        info!(
            "{}: {} rows written, {} duplicates skipped",
            report.category, report.write.rows_written, report.write.duplicates_skipped
        );
    }
    Ok(summary.is_success())
}

/// Load variables from `.env` (or `--env-file`), overriding the environment
///
/// Returns the file that was loaded, `None` when there is no `.env`.
fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>> {
    match path {
        Some(path) => {
            dotenvy::from_path_override(path).map_err(|e| {
                audit360::AuditError::Settings(vec![format!(
                    "Cannot read env file {}: {e}",
                    path.display()
                )])
            })?;
            Ok(Some(path.to_path_buf()))
        }
        None => match dotenvy::dotenv_override() {
            Ok(loaded) => Ok(Some(loaded)),
            Err(e) if e.not_found() => Ok(None),
            Err(e) => Err(audit360::AuditError::Settings(vec![format!(
                "Cannot read .env file: {e}"
            )])),
        },
    }
}
