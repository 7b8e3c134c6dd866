// ⚙️ Settings
// Read once from the environment and passed explicitly to the store and
// the server; nothing here is process-global.

use crate::error::ConfigError;
use crate::rules::GroupingFields;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://app.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

// ============================================================================
// COLUMN BINDINGS
// ============================================================================

/// Which columns of the export the rules and the metric engine read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBindings {
    pub grouping: GroupingFields,
    pub date_header: String,
    /// Tried in order per row; first non-blank value wins
    pub patient_headers: Vec<String>,
}

impl Default for FieldBindings {
    fn default() -> Self {
        FieldBindings {
            grouping: GroupingFields::default(),
            date_header: "Date de Service".to_string(),
            patient_headers: vec!["Patient".to_string(), "ID RAMQ".to_string()],
        }
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_path: PathBuf,
    pub bind_addr: String,
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
    pub fields: FieldBindings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_path: database_path_from_url(DEFAULT_DATABASE_URL),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            fields: FieldBindings::default(),
        }
    }
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from any name → value lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(url) = lookup("DATABASE_URL") {
            settings.database_path = database_path_from_url(&url);
        }
        if let Some(addr) = lookup("CLAIMS_BIND_ADDR") {
            settings.bind_addr = addr;
        }
        if let Some(raw) = lookup("CLAIMS_REQUEST_TIMEOUT_SECS") {
            let secs = parse_number::<u64>("CLAIMS_REQUEST_TIMEOUT_SECS", &raw)?;
            settings.request_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("CLAIMS_MAX_UPLOAD_BYTES") {
            settings.max_upload_bytes = parse_number("CLAIMS_MAX_UPLOAD_BYTES", &raw)?;
        }

        let fields = &mut settings.fields;
        if let Some(v) = lookup("CLAIMS_FACTURE_FIELD") {
            fields.grouping.facture = v;
        }
        if let Some(v) = lookup("CLAIMS_DOCTOR_FIELD") {
            fields.grouping.doctor = v;
        }
        if let Some(v) = lookup("CLAIMS_CODE_FIELD") {
            fields.grouping.code = v;
        }
        if let Some(v) = lookup("CLAIMS_DATE_HEADER") {
            fields.date_header = v;
        }
        if let Some(v) = lookup("CLAIMS_PATIENT_HEADERS") {
            let headers: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
            if headers.is_empty() {
                return Err(ConfigError::InvalidSetting {
                    name: "CLAIMS_PATIENT_HEADERS",
                    value: v,
                    reason: "at least one header is required".to_string(),
                });
            }
            fields.patient_headers = headers;
        }

        Ok(settings)
    }
}

/// `sqlite://app.db`, `sqlite:///app.db` and a bare path all name `app.db`.
pub fn database_path_from_url(url: &str) -> PathBuf {
    let path = url
        .strip_prefix("sqlite:///")
        .or_else(|| url.strip_prefix("sqlite://"))
        .unwrap_or(url);
    PathBuf::from(path)
}

fn parse_number<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidSetting {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
