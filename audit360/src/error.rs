//! Error types for audit360
use api360_client::{Api360Error, AuditLogCategory};

/// Custom error type for audit360 operations
#[derive(thiserror::Error, Debug)]
pub enum AuditError {
    /// Audit log API error
    #[error("Audit log API error: {0}")]
    Api(#[from] Api360Error),

    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// One or more settings are missing or invalid
    #[error("Invalid settings: {}", .0.join("; "))]
    Settings(Vec<String>),

    /// An event could not be normalized
    #[error("Invalid audit record: {0}")]
    Record(String),

    /// Invalid datetime format
    #[error("Invalid datetime format: {0}")]
    InvalidDateTimeFormat(String),

    /// Malformed CSV content
    #[error("CSV error: {0}")]
    Csv(String),

    /// The API returned no events for a category
    #[error("No records were received from {0} audit logs")]
    NoRecords(AuditLogCategory),

    /// One or more day files could not be written
    #[error("Failed to write {count} {category} file(s)")]
    WriteFailed {
        category: AuditLogCategory,
        count: usize,
    },

    /// Logger could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Result type alias for audit360 operations
pub type Result<T> = std::result::Result<T, AuditError>;
