//! Per-day CSV output with deduplication against stored records
use crate::csv::{format_row, header_line};
use crate::error::Result;
use crate::record::{Record, comparable_value};
use crate::scanner::ExistingRecords;
use crate::settings::CategoryTarget;
use log::{debug, error, info};
use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::xxh3_64;

/// Separator used only for hashing, never written
const HASH_SEPARATOR: char = '\u{1f}';

/// Outcome of one `write_records` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub files_written: usize,
    pub rows_written: usize,
    pub duplicates_skipped: usize,
    pub failed_files: Vec<PathBuf>,
}

impl WriteSummary {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed_files.is_empty()
    }
}

/// Compute xxHash (xxh3) of a row's values in comparable form
fn compute_row_hash<S: AsRef<str>>(fields: &[&str], values: &[S]) -> u64 {
    let mut joined = String::new();
    for (i, (field, value)) in fields.iter().zip(values).enumerate() {
        if i > 0 {
            joined.push(HASH_SEPARATOR);
        }
        joined.push_str(&comparable_value(field, value.as_ref()));
    }
    xxh3_64(joined.as_bytes())
}

/// Day key (`YYYY-MM-DD`) of a record
fn day_of(record: &Record) -> &str {
    let date = record.date();
    date.get(..10).unwrap_or(date)
}

/// Path of the file holding one day of records
#[must_use]
pub fn day_file_path(target: &CategoryTarget<'_>, day: &str) -> PathBuf {
    target
        .dir
        .join(format!("{}_{}.{}", target.base_name, day, target.extension))
}

/// Whether the first line of `path` equals `header`
fn has_header(path: &Path, header: &str) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut first_line = String::new();
    if BufReader::new(file).read_line(&mut first_line).is_err() {
        return false;
    }
    first_line.trim_end_matches(['\n', '\r']) == header
}

/// Whether a non-empty file's last byte is `\n`
fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn write_day_file(path: &Path, header: &str, records: &[Record]) -> Result<()> {
    let mut content = String::new();
    let mut file = if has_header(path, header) {
        debug!("Appending {} rows to {}", records.len(), path.display());
        let mut file = OpenOptions::new().read(true).append(true).open(path)?;
        if !ends_with_newline(&mut file)? {
            debug!("{} lacks a final newline, terminating its last line", path.display());
            content.push('\n');
        }
        file
    } else {
        debug!("Creating {} with header", path.display());
        content.push_str(header);
        content.push('\n');
        File::create(path)?
    };

    for record in records {
        content.push_str(&format_row(record.values().iter().map(String::as_str)));
    }
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Append new records to their per-day files
///
/// Records equal to a stored row are skipped. The remaining records are
/// grouped by day and sorted by `date`; each day file is appended to when
/// its first line is the header, or (re)created with the header otherwise.
/// A failure on one file is logged and recorded; other days still run.
pub fn write_records(
    target: &CategoryTarget<'_>,
    fields: &[&str],
    records: Vec<Record>,
    existing: &ExistingRecords,
) -> WriteSummary {
    let mut summary = WriteSummary::default();

    let existing_hashes: HashSet<u64> = existing
        .rows
        .iter()
        .map(|row| compute_row_hash(fields, row.as_slice()))
        .collect();

    let mut by_day: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    for record in records {
        if existing_hashes.contains(&compute_row_hash(record.fields(), record.values())) {
            summary.duplicates_skipped = summary.duplicates_skipped.saturating_add(1);
            continue;
        }
        by_day
            .entry(day_of(&record).to_string())
            .or_default()
            .push(record);
    }

    info!(
        "Deduplication: {} duplicates removed, {} days to write",
        summary.duplicates_skipped,
        by_day.len()
    );

    let header = header_line(fields);
    for (day, mut day_records) in by_day {
        day_records.sort_by(|a, b| a.date().cmp(b.date()));
        let path = day_file_path(target, &day);

        match write_day_file(&path, &header, &day_records) {
            Ok(()) => {
                info!("Wrote {} records to {}", day_records.len(), path.display());
                summary.files_written = summary.files_written.saturating_add(1);
                summary.rows_written = summary.rows_written.saturating_add(day_records.len());
            }
            Err(e) => {
                error!("Failed to write {}: {}", path.display(), e);
                summary.failed_files.push(path);
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv::read_table;
    use crate::record::{DISK_FIELDS, MAIL_FIELDS, normalize_disk, normalize_mail, unescape_field};
    use crate::scanner::load_existing_records;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn target(dir: &Path) -> CategoryTarget<'_> {
        CategoryTarget {
            dir,
            base_name: "mail_log",
            extension: "csv",
        }
    }

    fn mail(date: &str, subject: &str) -> Record {
        normalize_mail(&json!({
            "eventType": "message_seen",
            "date": date,
            "subject": subject,
            "orgId": 1,
        }))
        .unwrap()
    }

    #[test]
    fn test_write_groups_by_day_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        let target = target(temp_dir.path());
        let records = vec![
            mail("2024-03-02T00:00:05Z", "c"),
            mail("2024-03-01T12:00:00Z", "b"),
            mail("2024-03-01T08:00:00Z", "a"),
        ];

        let summary = write_records(&target, &MAIL_FIELDS, records, &ExistingRecords::default());
        assert_eq!(summary.files_written, 2);
        assert_eq!(summary.rows_written, 3);
        assert!(summary.is_success());

        let first = read_table(&day_file_path(&target, "2024-03-01")).unwrap();
        assert_eq!(first.header, MAIL_FIELDS);
        assert_eq!(first.rows.len(), 2);
        assert_eq!(first.rows[0][1], "2024-03-01 08:00:00");
        assert_eq!(first.rows[1][1], "2024-03-01 12:00:00");

        let second = read_table(&day_file_path(&target, "2024-03-02")).unwrap();
        assert_eq!(second.rows.len(), 1);
    }

    #[test]
    fn test_append_to_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let target = target(temp_dir.path());

        write_records(
            &target,
            &MAIL_FIELDS,
            vec![mail("2024-03-01T08:00:00Z", "a")],
            &ExistingRecords::default(),
        );
        let existing = load_existing_records(&target, &MAIL_FIELDS).unwrap();
        let summary = write_records(
            &target,
            &MAIL_FIELDS,
            vec![
                mail("2024-03-01T08:00:00Z", "a"),
                mail("2024-03-01T09:00:00Z", "b"),
            ],
            &existing,
        );

        assert_eq!(summary.duplicates_skipped, 1);
        assert_eq!(summary.rows_written, 1);

        let table = read_table(&day_file_path(&target, "2024-03-01")).unwrap();
        assert_eq!(table.rows.len(), 2);
        let text = fs::read_to_string(day_file_path(&target, "2024-03-01")).unwrap();
        assert_eq!(text.matches("eventType;date").count(), 1);
    }

    #[test]
    fn test_file_without_header_is_recreated() {
        let temp_dir = TempDir::new().unwrap();
        let target = target(temp_dir.path());
        let path = day_file_path(&target, "2024-03-01");
        fs::write(&path, "garbage line\n").unwrap();

        write_records(
            &target,
            &MAIL_FIELDS,
            vec![mail("2024-03-01T08:00:00Z", "a")],
            &ExistingRecords::default(),
        );

        let table = read_table(&path).unwrap();
        assert_eq!(table.header, MAIL_FIELDS);
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_header_with_crlf_is_accepted() {
        let temp_dir = TempDir::new().unwrap();
        let target = target(temp_dir.path());
        let path = day_file_path(&target, "2024-03-01");
        fs::write(&path, format!("{}\r\n", MAIL_FIELDS.join(";"))).unwrap();

        write_records(
            &target,
            &MAIL_FIELDS,
            vec![mail("2024-03-01T08:00:00Z", "a")],
            &ExistingRecords::default(),
        );

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(&format!("{}\r\n", MAIL_FIELDS.join(";"))));
        assert_eq!(read_table(&path).unwrap().rows.len(), 1);
    }

    #[test]
    fn test_semicolon_survives_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let target = target(temp_dir.path());

        write_records(
            &target,
            &MAIL_FIELDS,
            vec![mail("2024-03-01T08:00:00Z", "re: a; b; \"c\"")],
            &ExistingRecords::default(),
        );

        let table = read_table(&day_file_path(&target, "2024-03-01")).unwrap();
        let subject = &table.rows[0][table.column("subject").unwrap()];
        assert!(!subject.contains(';'));
        assert_eq!(unescape_field(subject), "re: a; b; \"c\"");
    }

    #[test]
    fn test_header_without_final_newline_is_not_fused() {
        let temp_dir = TempDir::new().unwrap();
        let target = target(temp_dir.path());
        let path = day_file_path(&target, "2024-03-01");
        fs::write(&path, MAIL_FIELDS.join(";")).unwrap();

        let summary = write_records(
            &target,
            &MAIL_FIELDS,
            vec![mail("2024-03-01T08:00:00Z", "a")],
            &ExistingRecords::default(),
        );
        assert_eq!(summary.rows_written, 1);

        let table = read_table(&path).unwrap();
        assert_eq!(table.header, MAIL_FIELDS);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][1], "2024-03-01 08:00:00");
    }

    #[test]
    fn test_truncated_last_row_is_terminated_before_append() {
        let temp_dir = TempDir::new().unwrap();
        let target = target(temp_dir.path());
        write_records(
            &target,
            &MAIL_FIELDS,
            vec![mail("2024-03-01T08:00:00Z", "a")],
            &ExistingRecords::default(),
        );
        let path = day_file_path(&target, "2024-03-01");
        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, text.trim_end_matches('\n')).unwrap();

        write_records(
            &target,
            &MAIL_FIELDS,
            vec![mail("2024-03-01T09:00:00Z", "b")],
            &ExistingRecords::default(),
        );

        let table = read_table(&path).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1][1], "2024-03-01 09:00:00");
    }

    #[test]
    fn test_rows_from_earlier_exporter_are_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let target = CategoryTarget {
            dir: temp_dir.path(),
            base_name: "disk_log",
            extension: "csv",
        };
        let event = json!({
            "eventType": "fs-copy",
            "date": "2024-03-02T08:00:00Z",
            "lastModificationDate": "2023-11-20T17:45:10Z",
            "path": "disk:/docs/a;b.pdf",
            "orgId": 12345,
        });
        // raw ISO lastModificationDate and an unescaped, quoted `;` in path
        let mut values: Vec<String> = normalize_disk(&event).unwrap().values().to_vec();
        values[12] = "\"disk:/docs/a;b.pdf\"".to_string();
        values[14] = "2023-11-20T17:45:10Z".to_string();
        let path = day_file_path(&target, "2024-03-02");
        fs::write(
            &path,
            format!("{}\r\n{}\r\n", DISK_FIELDS.join(";"), values.join(";")),
        )
        .unwrap();

        let existing = load_existing_records(&target, &DISK_FIELDS).unwrap();
        assert_eq!(existing.len(), 1);
        let summary = write_records(
            &target,
            &DISK_FIELDS,
            vec![normalize_disk(&event).unwrap()],
            &existing,
        );

        assert_eq!(summary.duplicates_skipped, 1);
        assert_eq!(summary.rows_written, 0);
        assert_eq!(read_table(&path).unwrap().rows.len(), 1);
    }

    #[test]
    fn test_failed_file_does_not_stop_other_days() {
        let temp_dir = TempDir::new().unwrap();
        let target = target(temp_dir.path());
        // a directory where the day file should be cannot be opened as a file
        fs::create_dir(day_file_path(&target, "2024-03-01")).unwrap();

        let summary = write_records(
            &target,
            &MAIL_FIELDS,
            vec![
                mail("2024-03-01T08:00:00Z", "a"),
                mail("2024-03-02T08:00:00Z", "b"),
            ],
            &ExistingRecords::default(),
        );

        assert_eq!(summary.failed_files.len(), 1);
        assert_eq!(summary.files_written, 1);
        assert!(!summary.is_success());
        assert!(day_file_path(&target, "2024-03-02").is_file());
    }
}
