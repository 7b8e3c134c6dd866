// 📋 Required-Headers Rule
// Subset check of the uploaded header row against the configured list.

use super::{Finding, FindingContext, RuleKind};
use crate::delimiter::Delimiter;
use crate::error::ConfigError;
use crate::header::{normalize, HeaderLookup};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Store row name of this rule.
pub const RULE_NAME: &str = "required_headers";

/// Keys the params blob must carry.
pub const REQUIRED_KEYS: [&str; 5] = [
    "required_headers",
    "delimiter",
    "ignore_extras",
    "case_insensitive",
    "trim_whitespace",
];

/// Header list of the daily claims export.
pub const CLAIMS_EXPORT_HEADERS: [&str; 23] = [
    "#",
    "Facture",
    "ID RAMQ",
    "Date de Service",
    "Début",
    "Fin",
    "Periode",
    "Lieu de pratique",
    "Secteur d'activité",
    "Diagnostic",
    "Code",
    "Unités",
    "Règle",
    "Élément de contexte",
    "Montant Preliminaire",
    "Montant payé",
    "Doctor Info",
    "DEV NOTE - TRADUIRE: Report_DailyClaimInfo_TotalPrelAmount",
    "DEV NOTE - TRADUIRE: Report_DailyClaimInfo_TotalFinalAmount",
    "DEV NOTE - TRADUIRE: Report_DailyClaimInfo_TotalCount",
    "Agence",
    "Patient",
    "Grand Total",
];

// ============================================================================
// PARAMETERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredHeadersParams {
    /// Non-empty, in reporting order
    pub required_headers: Vec<String>,
    /// Delimiter the export is expected to use (informational)
    pub delimiter: String,
    /// Extras are always permitted; kept for round-tripping the stored blob
    pub ignore_extras: bool,
    pub case_insensitive: bool,
    pub trim_whitespace: bool,
}

impl RequiredHeadersParams {
    /// Parse and validate a params blob as stored in the rule store.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(text).map_err(|source| ConfigError::InvalidJson { source })?;
        Self::from_value(value)
    }

    /// Validate shape at load time: object, all five keys, right types,
    /// non-empty header list.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let Value::Object(mut map) = value else {
            return Err(ConfigError::NotAnObject);
        };

        for key in REQUIRED_KEYS {
            if !map.contains_key(key) {
                return Err(ConfigError::MissingKey { key });
            }
        }

        let params = RequiredHeadersParams {
            required_headers: take_key(&mut map, "required_headers")?,
            delimiter: take_key(&mut map, "delimiter")?,
            ignore_extras: take_key(&mut map, "ignore_extras")?,
            case_insensitive: take_key(&mut map, "case_insensitive")?,
            trim_whitespace: take_key(&mut map, "trim_whitespace")?,
        };

        if params.required_headers.is_empty() {
            return Err(ConfigError::EmptyRequiredHeaders);
        }

        Ok(params)
    }

    /// Params seeded into a fresh store.
    pub fn claims_export() -> Self {
        RequiredHeadersParams {
            required_headers: CLAIMS_EXPORT_HEADERS.iter().map(|h| h.to_string()).collect(),
            delimiter: ";".to_string(),
            ignore_extras: true,
            case_insensitive: true,
            trim_whitespace: true,
        }
    }

    /// Params blob as stored in the rule store.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string(self).map_err(|source| ConfigError::EncodeParams { source })
    }

    /// Configured delimiter, if it is one the detector knows.
    pub fn delimiter_hint(&self) -> Option<Delimiter> {
        let mut chars = self.delimiter.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Delimiter::from_char(c),
            _ => None,
        }
    }

    fn canonical(&self, header: &str) -> String {
        normalize(header, self.case_insensitive, self.trim_whitespace)
    }
}

fn take_key<T: DeserializeOwned>(map: &mut Map<String, Value>, key: &'static str) -> Result<T, ConfigError> {
    let value = map.remove(key).ok_or(ConfigError::MissingKey { key })?;
    serde_json::from_value(value).map_err(|source| ConfigError::WrongType { key, source })
}

// ============================================================================
// EVALUATION
// ============================================================================

/// Required headers absent from `uploaded_headers`, in rule-parameter order
/// and spelling. Every absent entry is listed, including entries that share
/// a canonical form.
pub fn missing_headers(uploaded_headers: &[String], params: &RequiredHeadersParams) -> Vec<String> {
    let present = HeaderLookup::new(uploaded_headers, params.case_insensitive, params.trim_whitespace);

    params
        .required_headers
        .iter()
        .filter(|required| !present.contains_canonical(&params.canonical(required)))
        .cloned()
        .collect()
}

/// One finding listing every missing header, or none at all.
pub fn evaluate(uploaded_headers: &[String], params: &RequiredHeadersParams) -> Vec<Finding> {
    let missing = missing_headers(uploaded_headers, params);
    if missing.is_empty() {
        return Vec::new();
    }

    vec![Finding {
        rule: RuleKind::RequiredHeaders,
        message: format!("Missing required header(s): {}", missing.join(", ")),
        context: FindingContext::MissingHeaders { missing },
    }]
}

// ============================================================================
// TESTS
// ============================================================================
