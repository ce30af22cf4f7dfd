//! Discovery of existing per-day CSV files
use crate::csv::read_table;
use crate::datetime::parse_record_datetime;
use crate::error::{AuditError, Result};
use crate::settings::CategoryTarget;
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use regex::Regex;
use std::fs;
use std::path::PathBuf;

/// Rows of the newest non-empty day file, projected onto the schema
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingRecords {
    /// File the rows came from
    pub source: Option<PathBuf>,
    /// Values in schema field order
    pub rows: Vec<Vec<String>>,
    date_column: Option<usize>,
}

impl ExistingRecords {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

fn day_file_pattern(target: &CategoryTarget<'_>) -> Result<Regex> {
    let pattern = format!(
        r"^{}_(\d{{4}}-\d{{2}}-\d{{2}})\.{}$",
        regex::escape(target.base_name),
        regex::escape(target.extension)
    );
    Regex::new(&pattern).map_err(|e| AuditError::Csv(format!("invalid file pattern: {e}")))
}

/// Day files of a category, newest day first
///
/// A missing or unreadable directory yields an empty list.
///
/// # Errors
///
/// Returns error if the base name or extension does not form a valid pattern
pub fn list_day_files(target: &CategoryTarget<'_>) -> Result<Vec<PathBuf>> {
    let pattern = day_file_pattern(target)?;

    let entries = match fs::read_dir(target.dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read directory {}: {}", target.dir.display(), e);
            return Ok(Vec::new());
        }
    };

    let mut files: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let filename = entry.file_name();
            let filename_str = filename.to_str()?;
            let captures = pattern.captures(filename_str)?;
            let day = captures.get(1)?.as_str();
            Some((day.to_string(), entry.path()))
        })
        .collect();

    // YYYY-MM-DD sorts lexicographically
    files.sort_by(|a, b| b.0.cmp(&a.0));

    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// Load the rows of the newest day file that has at least one data row
///
/// Unreadable or malformed files are logged and skipped.
///
/// # Errors
///
/// Returns error if the file pattern cannot be built
pub fn load_existing_records(
    target: &CategoryTarget<'_>,
    fields: &[&str],
) -> Result<ExistingRecords> {
    let date_column = fields.iter().position(|f| *f == "date");

    for path in list_day_files(target)? {
        debug!("Checking records in file {}", path.display());
        let table = match read_table(&path) {
            Ok(table) => table,
            Err(e) => {
                warn!("Skipping unreadable file {}: {}", path.display(), e);
                continue;
            }
        };

        if table.rows.is_empty() {
            debug!("No records in {}, selecting previous file", path.display());
            continue;
        }

        info!(
            "Loaded {} existing records from {}",
            table.rows.len(),
            path.display()
        );
        return Ok(ExistingRecords {
            rows: table.project(fields),
            source: Some(path),
            date_column,
        });
    }

    info!(
        "No existing records in {} for {}_*.{}",
        target.dir.display(),
        target.base_name,
        target.extension
    );
    Ok(ExistingRecords {
        date_column,
        ..ExistingRecords::default()
    })
}

/// Timestamp of the last stored record, or `None` when nothing is stored
///
/// # Errors
///
/// Returns `AuditError::InvalidDateTimeFormat` if the stored date is malformed
pub fn resume_anchor(existing: &ExistingRecords) -> Result<Option<NaiveDateTime>> {
    let Some(last) = existing.rows.last() else {
        return Ok(None);
    };
    let date = existing
        .date_column
        .and_then(|i| last.get(i))
        .map(String::as_str)
        .unwrap_or_default();
    parse_record_datetime(date).map(Some)
}
