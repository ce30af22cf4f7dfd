//! CLI argument parsing for audit360
use crate::settings::ENV_VARS;
use api360_client::{AuditLogCategory, DEFAULT_API_URL, FetchOptions, RetryConfig};
use chrono::TimeDelta;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "audit360",
    version,
    about = "Yandex 360 audit log export tool",
    long_about = "Downloads new mail and disk audit events of a Yandex 360 organization and appends them to per-day CSV files",
    after_help = "Each run resumes from the newest record already stored in the CSV catalogs.
Events are requested with a 2 minute overlap and deduplicated before writing.

EXAMPLES:
  # Export both categories using settings from .env
  audit360

  # Only the disk audit log, keeping a debug log file
  audit360 --only disk --log-file audit360.log

Run 'audit360 help-env' to list the required environment variables."
)]
pub struct Cli {
    /// Subcommand to execute (defaults to `run`)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Base URL of the Yandex 360 API
    #[arg(long, default_value = DEFAULT_API_URL, global = true, value_parser = validate_url)]
    pub api_url: String,

    /// Events requested per page
    #[arg(long, default_value_t = 100, global = true, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub page_size: u32,

    /// Pages followed by continuation token before re-anchoring the window
    #[arg(long, default_value_t = 20, global = true, value_parser = validate_positive_u32)]
    pub max_pages: u32,

    /// Re-anchor at the Nth event from the end of the last page
    #[arg(long, default_value_t = 10, global = true, value_parser = validate_positive_usize)]
    pub reanchor_offset: usize,

    /// Minutes subtracted from the last stored record when resuming
    #[arg(long, default_value_t = 2, global = true, value_parser = clap::value_parser!(u32).range(0..=1440))]
    pub overlap_minutes: u32,

    /// Retries after a failed request (0 disables retrying)
    #[arg(long, default_value_t = 3, global = true, value_parser = clap::value_parser!(u32).range(0..=10))]
    pub max_retries: u32,

    /// Base delay between retries in seconds (grows linearly)
    #[arg(long, default_value_t = 2, global = true, value_parser = clap::value_parser!(u64).range(0..=300))]
    pub retry_delay_secs: u64,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 30, global = true, value_parser = clap::value_parser!(u64).range(1..=600))]
    pub connect_timeout: u64,

    /// Whole-request timeout in seconds
    #[arg(long, default_value_t = 300, global = true, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub request_timeout: u64,

    /// HTTP(S) proxy for API requests
    #[arg(long, global = true, value_parser = validate_url)]
    pub proxy: Option<String>,

    /// Export only one category (mail or disk)
    #[arg(long, global = true, value_parser = clap::value_parser!(AuditLogCategory))]
    pub only: Option<AuditLogCategory>,

    /// Also append debug-level log lines to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging on the console
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Read environment variables from this file instead of ./.env
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Export new audit events (default)
    Run,

    /// Display help for environment variables
    HelpEnv,
}

impl Cli {
    /// Categories to export, in order
    #[must_use]
    pub fn categories(&self) -> Vec<AuditLogCategory> {
        match self.only {
            Some(category) => vec![category],
            None => AuditLogCategory::ALL.to_vec(),
        }
    }

    /// Pagination settings for the fetcher
    #[must_use]
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            page_size: self.page_size,
            overlap: TimeDelta::minutes(i64::from(self.overlap_minutes)),
            max_token_pages: self.max_pages,
            reanchor_offset: self.reanchor_offset,
        }
    }

    /// Retry policy for API requests
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries, self.retry_delay_secs.saturating_mul(1000))
    }
}

/// Validate an http(s) URL
fn validate_url(s: &str) -> Result<String, String> {
    let s_trimmed = s.trim();
    if s_trimmed.starts_with("https://") || s_trimmed.starts_with("http://") {
        Ok(s_trimmed.to_string())
    } else {
        Err(format!(
            "Invalid URL: '{}'. Expected http:// or https://",
            s
        ))
    }
}

/// Validate a count (> 0)
fn validate_positive_u32(s: &str) -> Result<u32, String> {
    let value: u32 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if value == 0 {
        return Err("Value must be greater than 0".to_string());
    }
    Ok(value)
}

/// Validate an offset (> 0)
fn validate_positive_usize(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if value == 0 {
        return Err("Value must be greater than 0".to_string());
    }
    Ok(value)
}

/// Print the environment variables the tool reads
pub fn print_environment_variables() {
    println!("Environment Variables");
    println!("====================");
    println!();
    println!("All variables are required. They may also be placed in a .env file");
    println!("next to the working directory (see --env-file).");
    println!();

    let width = ENV_VARS.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, description) in ENV_VARS {
        println!("  {name:<width$} - {description}");
    }
    println!();

    println!("LOGGING");
    println!("  RUST_LOG - Log filter, overrides the default (info) and --verbose");
    println!();
}
