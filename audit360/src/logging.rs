//! Logger setup
//!
//! Lines look like `2024-03-01 10:15:30.250 INFO:\t message`, on stderr and
//! optionally appended to a debug-level log file as well.
use crate::error::{AuditError, Result};
use chrono::Local;
use env_logger::{Builder, Env, Logger, Target};
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

fn write_line<W: Write + ?Sized>(out: &mut W, record: &Record<'_>) -> io::Result<()> {
    writeln!(
        out,
        "{} {}:\t {}",
        Local::now().format(TIMESTAMP_FORMAT),
        record.level(),
        record.args()
    )
}

/// Filter of the log file, independent of the console level
const FILE_FILTER: &str = "info,audit360=debug,api360_client=debug";

/// Console logger plus an optional file logger with its own filter
struct AppLogger {
    console: Logger,
    file: Option<Logger>,
}

impl AppLogger {
    fn max_level(&self) -> LevelFilter {
        let file = self.file.as_ref().map_or(LevelFilter::Off, Logger::filter);
        self.console.filter().max(file)
    }
}

impl Log for AppLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.console.enabled(metadata) || self.file.as_ref().is_some_and(|f| f.enabled(metadata))
    }

    fn log(&self, record: &Record<'_>) {
        self.console.log(record);
        if let Some(file) = &self.file {
            file.log(record);
        }
    }

    fn flush(&self) {
        self.console.flush();
        if let Some(file) = &self.file {
            file.flush();
        }
    }
}

fn console_logger(verbose: bool) -> Logger {
    let default_filter = if verbose { FILE_FILTER } else { "info" };
    Builder::from_env(Env::default().default_filter_or(default_filter))
        .format(|buf, record| write_line(buf, record))
        .build()
}

fn file_logger(path: &Path) -> Result<Logger> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Builder::new()
        .parse_filters(FILE_FILTER)
        .format(|buf, record| write_line(buf, record))
        .target(Target::Pipe(Box::new(file)))
        .build())
}

/// Install the global logger
///
/// The console follows `RUST_LOG`, falling back to `info`, or `debug` for
/// this workspace's crates when `verbose` is set. A log file always gets
/// `debug` lines of this workspace's crates.
///
/// # Errors
///
/// Returns error if the log file cannot be opened or a logger is already set
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let logger = AppLogger {
        console: console_logger(verbose),
        file: log_file.map(file_logger).transpose()?,
    };
    let max_level = logger.max_level();

    log::set_boxed_logger(Box::new(logger)).map_err(|e| AuditError::Logging(e.to_string()))?;
    log::set_max_level(max_level);
    Ok(())
}

/// Flush buffered log output
pub fn flush() {
    log::logger().flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn test_file_gets_debug_lines_of_workspace_crates() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("audit360.log");
        let logger = AppLogger {
            console: Builder::new().parse_filters("info").build(),
            file: Some(file_logger(&path).unwrap()),
        };
        assert_eq!(logger.max_level(), LevelFilter::Debug);

        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .target("api360_client::audit_log")
                .args(format_args!("Received 100 mail events"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .target("reqwest::connect")
                .args(format_args!("connecting"))
                .build(),
        );
        logger.flush();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(" DEBUG:\t Received 100 mail events\n"), "{text}");
        assert!(!text.contains("connecting"), "{text}");
    }

    #[test]
    fn test_console_only_without_file() {
        let logger = AppLogger {
            console: Builder::new().parse_filters("info").build(),
            file: None,
        };
        assert_eq!(logger.max_level(), LevelFilter::Info);
        let debug = Metadata::builder()
            .level(Level::Debug)
            .target("audit360::pipeline")
            .build();
        assert!(!logger.enabled(&debug));
    }

    #[test]
    fn test_line_format() {
        let mut out: Vec<u8> = Vec::new();
        write_line(
            &mut out,
            &Record::builder()
                .level(Level::Warn)
                .args(format_args!("Catalog missing"))
                .build(),
        )
        .unwrap();

        let line = String::from_utf8(out).unwrap();
        assert!(line.ends_with(" WARN:\t Catalog missing\n"), "{line}");
        let timestamp = &line[..23];
        assert!(
            chrono::NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S%.3f").is_ok(),
            "{timestamp}"
        );
    }
}
