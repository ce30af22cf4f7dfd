//! Semicolon-delimited CSV encoding and decoding
//!
//! Quoting follows the minimal style of Python's `csv` module, so files
//! written by earlier exporters read back unchanged: a field is quoted only
//! if it contains the delimiter, a quote or a line break, and quotes inside a
//! quoted field are doubled.
use crate::error::{AuditError, Result};
use std::borrow::Cow;
use std::fs;
use std::path::Path;

pub const DELIMITER: char = ';';

/// Parsed CSV file: header plus data rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// Column index of a header name
    #[must_use]
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Values of every row projected onto `fields`, missing columns as ""
    #[must_use]
    pub fn project(&self, fields: &[&str]) -> Vec<Vec<String>> {
        let columns: Vec<Option<usize>> = fields.iter().map(|f| self.column(f)).collect();
        self.rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|col| col.and_then(|i| row.get(i)).cloned().unwrap_or_default())
                    .collect()
            })
            .collect()
    }
}

/// Quote a field if it contains the delimiter, a quote or a line break
#[must_use]
pub fn escape_field(value: &str) -> Cow<'_, str> {
    if value.contains([DELIMITER, '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Encode one row, including the trailing newline
#[must_use]
pub fn format_row<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let fields: Vec<Cow<'_, str>> = values.into_iter().map(escape_field).collect();
    let mut line = if fields.len() == 1 && fields[0].is_empty() {
        // a lone empty field would otherwise be a blank line
        "\"\"".to_string()
    } else {
        fields.join(";")
    };
    line.push('\n');
    line
}

/// Header line (without newline) for a field list
#[must_use]
pub fn header_line(fields: &[&str]) -> String {
    fields.join(";")
}

/// Split CSV text into rows of fields
///
/// Blank lines are skipped. `\r\n` and `\n` both end a row.
///
/// # Errors
///
/// Returns `AuditError::Csv` if a quoted field is never closed.
pub fn parse_rows(text: &str) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut touched = false;
    let mut line: usize = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line = line.saturating_add(1);
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => {
                in_quotes = true;
                touched = true;
            }
            DELIMITER => {
                row.push(std::mem::take(&mut field));
                touched = true;
            }
            '\r' => {}
            '\n' => {
                if touched {
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                }
                touched = false;
                line = line.saturating_add(1);
            }
            _ => {
                field.push(c);
                touched = true;
            }
        }
    }

    if in_quotes {
        return Err(AuditError::Csv(format!(
            "unterminated quoted field at line {line}"
        )));
    }
    if touched {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

/// Parse CSV text whose first row is the header
///
/// # Errors
///
/// Returns `AuditError::Csv` on malformed quoting.
pub fn parse_table(text: &str) -> Result<CsvTable> {
    let mut rows = parse_rows(text)?.into_iter();
    let header = rows.next().unwrap_or_default();
    Ok(CsvTable {
        header,
        rows: rows.collect(),
    })
}

/// Read and parse a CSV file
///
/// # Errors
///
/// Returns error if the file cannot be read or is malformed.
pub fn read_table(path: &Path) -> Result<CsvTable> {
    let text = fs::read_to_string(path)?;
    parse_table(&text)
}
