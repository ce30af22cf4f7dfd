//! One export run: scan, fetch, normalize and write, per category
use crate::error::{AuditError, Result};
use crate::record::{Record, fields_for, normalize};
use crate::scanner::{load_existing_records, resume_anchor};
use crate::settings::Settings;
use crate::writer::{WriteSummary, write_records};
use api360_client::{Api360Client, AuditLogCategory, FetchOptions};
use chrono::NaiveDateTime;
use log::{error, info};

/// What one category run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryReport {
    pub category: AuditLogCategory,
    pub anchor: Option<NaiveDateTime>,
    pub pages: u32,
    pub events_fetched: usize,
    pub write: WriteSummary,
}

/// Outcome of a whole run
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<CategoryReport>,
    pub failed: Vec<(AuditLogCategory, AuditError)>,
}

impl RunSummary {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Export new events of one category
///
/// No CSV file is touched unless the fetch succeeded with at least one event
/// and every event normalized cleanly.
///
/// # Errors
///
/// Returns `AuditError::Api` if the fetch fails, `AuditError::NoRecords` if
/// the API returned nothing, `AuditError::Record` for an event that cannot be
/// normalized, and `AuditError::WriteFailed` if any day file failed.
pub async fn run_category(
    client: &Api360Client,
    settings: &Settings,
    category: AuditLogCategory,
    options: &FetchOptions,
) -> Result<CategoryReport> {
    let target = settings.target(category);
    let fields = fields_for(category);

    let existing = load_existing_records(&target, fields)?;
    let anchor = resume_anchor(&existing)?;
    match anchor {
        Some(anchor) => info!("Last stored {category} record: {anchor}"),
        None => info!("No stored {category} records"),
    }

    let outcome = client
        .audit_log_api(settings.organization_id)
        .fetch_events(category, anchor, options)
        .await?;

    if outcome.events.is_empty() {
        return Err(AuditError::NoRecords(category));
    }
    let events_fetched = outcome.events.len();

    let records = outcome
        .events
        .iter()
        .map(|event| normalize(category, event))
        .collect::<Result<Vec<Record>>>()?;

    let write = write_records(&target, fields, records, &existing);
    info!(
        "{category}: {} events fetched, {} duplicates skipped, {} rows written to {} files",
        events_fetched, write.duplicates_skipped, write.rows_written, write.files_written
    );

    if !write.is_success() {
        return Err(AuditError::WriteFailed {
            category,
            count: write.failed_files.len(),
        });
    }

    Ok(CategoryReport {
        category,
        anchor,
        pages: outcome.pages,
        events_fetched,
        write,
    })
}

/// Export every requested category in order
///
/// A failing category is logged and does not stop the next one.
pub async fn run(
    client: &Api360Client,
    settings: &Settings,
    categories: &[AuditLogCategory],
    options: &FetchOptions,
) -> RunSummary {
    let mut summary = RunSummary::default();

    for &category in categories {
        info!("Processing {category} audit log");
        match run_category(client, settings, category, options).await {
            Ok(report) => summary.reports.push(report),
            Err(e) => {
                error!("{category} audit log export failed: {e}");
                summary.failed.push((category, e));
            }
        }
    }

    summary
}
