// 🚨 Error Taxonomy
// Configuration errors, input-shape errors and store failures. Validation
// findings and per-row skips are NOT errors and never pass through here.

use thiserror::Error;

// ============================================================================
// CONFIGURATION ERRORS (fatal for the request, server-side)
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    /// No row with the given name in the `rules` table.
    #[error("rule not found in store (name='{name}')")]
    RuleNotFound { name: String },

    /// The rule row exists but has no params blob.
    #[error("rule '{name}' has no params")]
    MissingParams { name: String },

    /// Params blob is not valid JSON.
    #[error("rule params JSON is invalid: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    /// Params could not be encoded for storage.
    #[error("rule params could not be serialized: {source}")]
    EncodeParams {
        #[source]
        source: serde_json::Error,
    },

    #[error("rule params must be a JSON object")]
    NotAnObject,

    #[error("rule params missing key: {key}")]
    MissingKey { key: &'static str },

    #[error("rule params key '{key}' has the wrong type: {source}")]
    WrongType {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("rule params 'required_headers' must be a non-empty list")]
    EmptyRequiredHeaders,

    /// Bad environment setting.
    #[error("invalid setting {name}={value}: {reason}")]
    InvalidSetting {
        name: &'static str,
        value: String,
        reason: String,
    },
}

// ============================================================================
// INPUT-SHAPE ERRORS (fatal for the request, client-side)
// ============================================================================

#[derive(Debug, Error)]
pub enum InputError {
    #[error("upload is empty")]
    EmptyUpload,

    #[error("CSV appears to have no header row")]
    NoHeaderRow,

    /// A column the metric engine needs is absent.
    #[error("missing required header: '{header}'")]
    MissingColumn { header: String },

    #[error("upload exceeds {max_bytes} bytes")]
    TooLarge { max_bytes: usize },
}

// ============================================================================
// TOP-LEVEL ERROR
// ============================================================================

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error("rule store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),
}

impl ValidatorError {
    /// True when the caller sent something unusable (4xx), false when the
    /// failure is on our side (5xx).
    pub fn is_client_error(&self) -> bool {
        matches!(self, ValidatorError::Input(_) | ValidatorError::Csv(_))
    }
}

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, ValidatorError>;
