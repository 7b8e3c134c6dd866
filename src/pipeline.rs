// 🔄 Pipeline - one uploaded file, one pass
// RawUpload → Decoder → Delimiter Detector → Tabular Parser → rules / metrics

use crate::config::FieldBindings;
use crate::decode::{self, TextEncoding};
use crate::delimiter::{self, DelimiterDetection};
use crate::error::{InputError, Result};
use crate::metrics::{self, DailyPatientCount};
use crate::rules::required_headers;
use crate::rules::{CompanionCodeIndex, Finding, RequiredHeadersParams, RuleEngine};
use crate::table::{self, ParsedTable};
use serde::Serialize;
use sha2::{Digest, Sha256};

// ============================================================================
// INPUT
// ============================================================================

/// Bytes of one upload, discarded once parsed.
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
}

impl RawUpload {
    pub fn new(bytes: Vec<u8>, filename: Option<String>) -> Self {
        RawUpload { bytes, filename }
    }

    /// Hex SHA-256 of the raw bytes, for tracing a report back to its file.
    pub fn sha256(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        format!("{:x}", hasher.finalize())
    }
}

/// Decoded and parsed upload, plus the strategies that were chosen.
#[derive(Debug, Clone)]
pub struct PreparedUpload {
    pub encoding: TextEncoding,
    pub detection: DelimiterDetection,
    pub table: ParsedTable,
}

impl PreparedUpload {
    /// Human-readable notes about heuristics that may have gone wrong.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.detection.fallback {
            warnings.push(format!(
                "Delimiter detection fell back to '{}'. Check source file formatting if results look off.",
                self.detection.delimiter
            ));
        }
        if self.encoding == TextEncoding::Utf8Lossy {
            warnings.push("File is not valid UTF-8 or Latin-1; undecodable bytes were replaced.".to_string());
        }
        if self.table.overflow_rows > 0 {
            warnings.push(format!(
                "{} row(s) had more fields than the header row; extra fields were ignored.",
                self.table.overflow_rows
            ));
        }
        warnings
    }
}

/// Decode, detect the delimiter and parse. An empty upload or a file with no
/// header row is an input error, distinct from any validation finding.
pub fn prepare(upload: &RawUpload) -> Result<PreparedUpload> {
    if upload.bytes.is_empty() {
        return Err(InputError::EmptyUpload.into());
    }

    let decoded = decode::decode(&upload.bytes);
    if decoded.text.trim().is_empty() {
        return Err(InputError::EmptyUpload.into());
    }

    let detection = delimiter::detect(&decoded.text);
    let table = table::parse(&decoded.text, detection.delimiter)?;
    if !table.has_header_row() {
        return Err(InputError::NoHeaderRow.into());
    }

    tracing::info!(
        encoding = decoded.encoding.name(),
        delimiter = detection.delimiter.hint(),
        headers = table.headers.len(),
        rows = table.rows.len(),
        "prepared upload"
    );

    Ok(PreparedUpload {
        encoding: decoded.encoding,
        detection,
        table,
    })
}

// ============================================================================
// INGESTION (validation)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub filename: Option<String>,
    pub sha256: String,
    pub encoding: &'static str,
    pub delimiter_hint: &'static str,
    pub delimiter_fallback: bool,
    /// Delimiter the rule configuration expects, when it differs from the detected one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_delimiter: Option<String>,
    pub uploaded_headers: Vec<String>,
    pub required_headers: Vec<String>,
    pub row_count: usize,
    pub valid: bool,
    pub missing_headers: Vec<String>,
    pub errors: Vec<Finding>,
    pub warnings: Vec<String>,
}

/// Run the full rule set over one upload.
pub fn ingest(
    upload: &RawUpload,
    params: &RequiredHeadersParams,
    index: &CompanionCodeIndex,
    fields: &FieldBindings,
) -> Result<IngestReport> {
    let prepared = prepare(upload)?;
    let table = &prepared.table;

    let engine = RuleEngine::standard(params.clone(), index.clone(), fields.grouping.clone());
    let errors = engine.run_all(&table.headers, &table.rows);
    let missing_headers = required_headers::missing_headers(&table.headers, params);

    let expected_delimiter = params
        .delimiter_hint()
        .filter(|d| *d != prepared.detection.delimiter)
        .map(|d| d.to_string());

    let mut warnings = prepared.warnings();
    if let Some(expected) = &expected_delimiter {
        warnings.push(format!(
            "Rule configuration expects '{}' but the file uses '{}'.",
            expected, prepared.detection.delimiter
        ));
    }

    tracing::info!(
        findings = errors.len(),
        missing_headers = missing_headers.len(),
        "validated upload"
    );

    Ok(IngestReport {
        filename: upload.filename.clone(),
        sha256: upload.sha256(),
        encoding: prepared.encoding.name(),
        delimiter_hint: prepared.detection.delimiter.hint(),
        delimiter_fallback: prepared.detection.fallback,
        expected_delimiter,
        uploaded_headers: table.headers.clone(),
        required_headers: params.required_headers.clone(),
        row_count: table.rows.len(),
        valid: errors.is_empty(),
        missing_headers,
        errors,
        warnings,
    })
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct MetricMeta {
    pub rows_total: usize,
    pub rows_used: usize,
    pub rows_skipped: usize,
    pub skipped_invalid_date: usize,
    pub skipped_blank_patient: usize,
    pub delimiter: String,
    pub delimiter_fallback: bool,
    pub encoding: &'static str,
    pub date_column: String,
    pub patient_columns: Vec<String>,
    pub date_formats: std::collections::BTreeMap<String, usize>,
    pub patient_sources: std::collections::BTreeMap<String, usize>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyPatientReport {
    pub filename: Option<String>,
    pub results: Vec<DailyPatientCount>,
    pub meta: MetricMeta,
}

/// Unique patients per service date for one upload.
pub fn unique_patients(upload: &RawUpload, fields: &FieldBindings) -> Result<DailyPatientReport> {
    let prepared = prepare(upload)?;
    let outcome = metrics::compute(
        &prepared.table.headers,
        &prepared.table.rows,
        &fields.date_header,
        &fields.patient_headers,
    )?;

    let mut warnings = prepared.warnings();
    if outcome.rows_skipped > 0 {
        warnings.push(format!(
            "{} row(s) skipped due to missing/invalid date or patient identifier.",
            outcome.rows_skipped
        ));
    }

    Ok(DailyPatientReport {
        filename: upload.filename.clone(),
        results: outcome.results,
        meta: MetricMeta {
            rows_total: outcome.rows_total,
            rows_used: outcome.rows_used,
            rows_skipped: outcome.rows_skipped,
            skipped_invalid_date: outcome.skipped_invalid_date,
            skipped_blank_patient: outcome.skipped_blank_patient,
            delimiter: prepared.detection.delimiter.to_string(),
            delimiter_fallback: prepared.detection.fallback,
            encoding: prepared.encoding.name(),
            date_column: outcome.date_column,
            patient_columns: outcome.patient_columns,
            date_formats: outcome.date_formats,
            patient_sources: outcome.patient_sources,
            warnings,
        },
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delimiter::Delimiter;
    use crate::error::ValidatorError;
    use crate::rules::{CompanionCodeRule, FindingContext, RuleKind};

    fn upload(text: &str) -> RawUpload {
        RawUpload::new(text.as_bytes().to_vec(), Some("export.csv".to_string()))
    }

    fn params(required: &[&str]) -> RequiredHeadersParams {
        RequiredHeadersParams {
            required_headers: required.iter().map(|s| s.to_string()).collect(),
            delimiter: ";".to_string(),
            ignore_extras: true,
            case_insensitive: true,
            trim_whitespace: true,
        }
    }

    #[test]
    fn test_empty_upload_is_input_error() {
        let err = prepare(&RawUpload::new(Vec::new(), None)).unwrap_err();
        assert!(matches!(err, ValidatorError::Input(InputError::EmptyUpload)));

        let err = prepare(&upload("\n\n  \n")).unwrap_err();
        assert!(matches!(err, ValidatorError::Input(InputError::EmptyUpload)));
    }

    #[test]
    fn test_blank_header_row_is_input_error() {
        let err = prepare(&upload(";;\n1;2;3\n")).unwrap_err();
        assert!(matches!(err, ValidatorError::Input(InputError::NoHeaderRow)));
    }

    #[test]
    fn test_ingest_reports_findings_and_metadata() {
        let index = CompanionCodeIndex::from_rules(vec![CompanionCodeRule::new("15802", "19957", true)]);
        let text = "\u{feff}Facture;Doctor Info;Code\nF1;D1;15802\nF2;D1;15802\nF2;D1;19957\n";

        let report = ingest(
            &upload(text),
            &params(&["Facture", "Code", "Patient"]),
            &index,
            &FieldBindings::default(),
        )
        .unwrap();

        assert_eq!(report.encoding, "utf-8-sig");
        assert_eq!(report.delimiter_hint, "semicolon");
        assert_eq!(report.uploaded_headers, vec!["Facture", "Doctor Info", "Code"]);
        assert_eq!(report.row_count, 3);
        assert!(!report.valid);
        assert_eq!(report.missing_headers, vec!["Patient"]);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors[0].rule, RuleKind::RequiredHeaders);
        match &report.errors[1].context {
            FindingContext::MissingCompanions { facture, .. } => assert_eq!(facture, "F1"),
            other => panic!("unexpected context: {:?}", other),
        }
        assert!(report.expected_delimiter.is_none());
        assert_eq!(report.sha256.len(), 64);
    }

    #[test]
    fn test_ingest_latin1_comma_file() {
        // "Unités" in ISO-8859-1
        let mut bytes = b"Facture,Unit".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b"s\nF1,2\n");

        let report = ingest(
            &RawUpload::new(bytes, None),
            &params(&["Unités"]),
            &CompanionCodeIndex::default(),
            &FieldBindings::default(),
        )
        .unwrap();

        assert_eq!(report.encoding, "latin-1");
        assert!(report.valid);
        assert_eq!(report.expected_delimiter.as_deref(), Some(";"));
        assert!(report.warnings.iter().any(|w| w.contains("expects ';'")));
    }

    #[test]
    fn test_bom_latin1_file_keeps_first_header_clean() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"#;Facture;Unit\xE9s\n1;F1;2\n");

        let report = ingest(
            &RawUpload::new(bytes, None),
            &params(&["#", "Facture", "Unités"]),
            &CompanionCodeIndex::default(),
            &FieldBindings::default(),
        )
        .unwrap();

        assert_eq!(report.encoding, "latin-1");
        assert_eq!(report.uploaded_headers, vec!["#", "Facture", "Unités"]);
        assert!(report.missing_headers.is_empty());
        assert!(report.valid);
    }

    #[test]
    fn test_unique_patients_report() {
        let text = "Date de Service;Patient\n2025-01-01;P1\n2025-01-01;P2\nnot-a-date;P3\n";
        let report = unique_patients(&upload(text), &FieldBindings::default()).unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].unique_patients, 2);
        assert_eq!(report.meta.rows_total, 3);
        assert_eq!(report.meta.rows_skipped, 1);
        assert_eq!(report.meta.delimiter, ";");
        assert_eq!(report.meta.warnings.len(), 1);
    }

    #[test]
    fn test_single_column_warns_about_delimiter_fallback() {
        let prepared = prepare(&upload("Patient\nP1\n")).unwrap();
        assert_eq!(prepared.detection.delimiter, Delimiter::Comma);
        assert!(prepared.warnings()[0].contains("fell back"));
    }

    #[test]
    fn test_report_json_field_names() {
        let text = "Date de Service;Patient\n2025-01-01;P1\n";
        let report = unique_patients(&upload(text), &FieldBindings::default()).unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["results"][0]["date"], "2025-01-01");
        assert_eq!(json["results"][0]["unique_patients"], 1);
        assert_eq!(json["meta"]["rows_used"], 1);
    }
}
