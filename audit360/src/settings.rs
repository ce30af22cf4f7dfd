//! Settings loaded from environment variables
//!
//! All values are read and validated once at startup; the resulting
//! [`Settings`] is passed by reference to the rest of the program.
use crate::error::{AuditError, Result};
use api360_client::AuditLogCategory;
use log::error;
use secrecy::SecretString;
use std::path::{Path, PathBuf};

pub const ENV_TOKEN: &str = "OAUTH_TOKEN_ARG";
pub const ENV_ORG_ID: &str = "ORGANIZATION_ID_ARG";
pub const ENV_MAIL_DIR: &str = "MAIL_LOG_CATALOG_LOCATION";
pub const ENV_DISK_DIR: &str = "DISK_LOG_CATALOG_LOCATION";
pub const ENV_EXTENSION: &str = "LOG_FILE_EXTENSION";
pub const ENV_MAIL_FILE: &str = "MAIL_LOG_FILE_BASE_NAME";
pub const ENV_DISK_FILE: &str = "DISK_LOG_FILE_BASE_NAME";

/// Required variables with a short description, for `help-env`
pub const ENV_VARS: [(&str, &str); 7] = [
    (ENV_TOKEN, "OAuth token with audit log read access"),
    (ENV_ORG_ID, "Organization id (non-zero integer)"),
    (ENV_MAIL_DIR, "Existing directory for mail audit CSV files"),
    (ENV_DISK_DIR, "Existing directory for disk audit CSV files"),
    (ENV_EXTENSION, "Extension of the CSV files, e.g. csv"),
    (ENV_MAIL_FILE, "Base name of mail audit files (<base>_YYYY-MM-DD.<ext>)"),
    (ENV_DISK_FILE, "Base name of disk audit files (<base>_YYYY-MM-DD.<ext>)"),
];

/// Validated configuration snapshot
#[derive(Debug)]
pub struct Settings {
    token: SecretString,
    pub organization_id: u64,
    pub mail_dir: PathBuf,
    pub disk_dir: PathBuf,
    pub extension: String,
    pub mail_file: String,
    pub disk_file: String,
}

/// Where one category's CSV files live
#[derive(Debug, Clone, Copy)]
pub struct CategoryTarget<'a> {
    pub dir: &'a Path,
    pub base_name: &'a str,
    pub extension: &'a str,
}

impl Settings {
    /// Load settings from the process environment
    ///
    /// # Errors
    ///
    /// Returns `AuditError::Settings` listing every missing or invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup
    ///
    /// # Errors
    ///
    /// Returns `AuditError::Settings` listing every missing or invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut problems: Vec<String> = Vec::new();
        let mut report = |message: String| {
            error!("{message}");
            problems.push(message);
        };

        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let token = read(ENV_TOKEN);
        if token.is_none() {
            report(format!("{ENV_TOKEN} is not set"));
        }

        let organization_id = match read(ENV_ORG_ID).map(|v| v.parse::<u64>()) {
            None => {
                report(format!("{ENV_ORG_ID} is not set"));
                0
            }
            Some(Err(_)) => {
                report(format!("{ENV_ORG_ID} must be an integer"));
                0
            }
            Some(Ok(0)) => {
                report(format!("{ENV_ORG_ID} must not be 0"));
                0
            }
            Some(Ok(id)) => id,
        };

        let mut read_dir = |key: &str| -> PathBuf {
            match read(key) {
                None => {
                    report(format!("{key} is not set"));
                    PathBuf::new()
                }
                Some(raw) => {
                    let dir = PathBuf::from(strip_trailing_separator(&raw));
                    if !dir.is_dir() {
                        report(format!("Catalog {} does not exist", dir.display()));
                    }
                    dir
                }
            }
        };
        let mail_dir = read_dir(ENV_MAIL_DIR);
        let disk_dir = read_dir(ENV_DISK_DIR);

        let mut read_required = |key: &str| -> String {
            read(key).unwrap_or_else(|| {
                report(format!("{key} is not set"));
                String::new()
            })
        };
        let extension = read_required(ENV_EXTENSION);
        let mail_file = read_required(ENV_MAIL_FILE);
        let disk_file = read_required(ENV_DISK_FILE);

        match token {
            Some(token) if problems.is_empty() => Ok(Self {
                token: SecretString::new(token.into()),
                organization_id,
                mail_dir,
                disk_dir,
                extension: extension.trim_start_matches('.').to_string(),
                mail_file,
                disk_file,
            }),
            _ => Err(AuditError::Settings(problems)),
        }
    }

    /// OAuth token for the API client
    #[must_use]
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// Directory and file naming for one category
    #[must_use]
    pub fn target(&self, category: AuditLogCategory) -> CategoryTarget<'_> {
        let (dir, base_name) = match category {
            AuditLogCategory::Mail => (&self.mail_dir, &self.mail_file),
            AuditLogCategory::Disk => (&self.disk_dir, &self.disk_file),
        };
        CategoryTarget {
            dir,
            base_name,
            extension: &self.extension,
        }
    }
}

/// Drop one trailing `/` or `\`, keeping a bare root intact
fn strip_trailing_separator(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix(['/', '\\']).unwrap_or(path)
    } else {
        path
    }
}
