//! audit360 library - incremental export of Yandex 360 audit logs
//!
//! Mail and disk audit events are fetched from the organization's security
//! API and appended to per-day `;`-separated CSV files, resuming from the
//! newest stored record.
pub mod cli;
pub mod csv;
pub mod datetime;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod record;
pub mod scanner;
pub mod settings;
pub mod writer;

// Re-export commonly used types
pub use error::{AuditError, Result};
pub use pipeline::{CategoryReport, RunSummary};
pub use settings::Settings;
