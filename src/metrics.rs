// 📊 Metric Engine - unique patients per day
// Read-only aggregation over parsed rows. Rows that cannot be used are
// counted and reported, never fatal.

use crate::error::{InputError, Result};
use crate::header::HeaderLookup;
use crate::table::Record;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

// ============================================================================
// DATE FORMATS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum DateFormat {
    IsoDate,
    IsoDateTimeMinutes,
    IsoDateTimeSeconds,
    DayMonthYearSlash,
    DayMonthYearDash,
    YearMonthDaySlash,
    /// `2025-09-14T10:30:00`: only the part before `T` is read
    IsoWithT,
}

impl DateFormat {
    /// Tried in this order; the first that parses wins.
    pub const ORDERED: [DateFormat; 7] = [
        DateFormat::IsoDate,
        DateFormat::IsoDateTimeMinutes,
        DateFormat::IsoDateTimeSeconds,
        DateFormat::DayMonthYearSlash,
        DateFormat::DayMonthYearDash,
        DateFormat::YearMonthDaySlash,
        DateFormat::IsoWithT,
    ];

    pub fn pattern(&self) -> &'static str {
        match self {
            DateFormat::IsoDate => "%Y-%m-%d",
            DateFormat::IsoDateTimeMinutes => "%Y-%m-%d %H:%M",
            DateFormat::IsoDateTimeSeconds => "%Y-%m-%d %H:%M:%S",
            DateFormat::DayMonthYearSlash => "%d/%m/%Y",
            DateFormat::DayMonthYearDash => "%d-%m-%Y",
            DateFormat::YearMonthDaySlash => "%Y/%m/%d",
            DateFormat::IsoWithT => "%Y-%m-%dT*",
        }
    }

    fn parse(&self, s: &str) -> Option<NaiveDate> {
        match self {
            DateFormat::IsoDateTimeMinutes | DateFormat::IsoDateTimeSeconds => {
                NaiveDateTime::parse_from_str(s, self.pattern())
                    .ok()
                    .map(|dt| dt.date())
            }
            DateFormat::IsoWithT => {
                let (date, _) = s.split_once('T')?;
                NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
            }
            _ => NaiveDate::parse_from_str(s, self.pattern()).ok(),
        }
    }
}

/// Parse a date cell against [`DateFormat::ORDERED`].
pub fn parse_service_date(raw: &str) -> Option<(NaiveDate, DateFormat)> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    DateFormat::ORDERED
        .iter()
        .find_map(|format| format.parse(s).map(|date| (date, *format)))
}

// ============================================================================
// OUTPUT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyPatientCount {
    /// YYYY-MM-DD
    pub date: String,
    pub unique_patients: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricOutcome {
    /// Sorted by date ascending
    pub results: Vec<DailyPatientCount>,
    pub rows_total: usize,
    pub rows_used: usize,
    pub rows_skipped: usize,
    pub skipped_invalid_date: usize,
    pub skipped_blank_patient: usize,
    /// Uploaded spelling of the date column
    pub date_column: String,
    /// Uploaded spellings of the patient columns, in precedence order
    pub patient_columns: Vec<String>,
    /// How many used rows each date format parsed
    pub date_formats: BTreeMap<String, usize>,
    /// How many used rows took their identifier from each patient column
    pub patient_sources: BTreeMap<String, usize>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Count distinct patient identifiers per service date.
///
/// Columns are resolved by trimmed, case-insensitive header lookup. Patient
/// candidates are tried per row in order; the first non-blank value is the
/// identifier. Candidates absent from the file are ignored, but at least one
/// must be present.
pub fn compute(
    headers: &[String],
    rows: &[Record],
    date_header: &str,
    patient_candidates: &[String],
) -> Result<MetricOutcome> {
    let lookup = HeaderLookup::lenient(headers);

    let date_column = lookup
        .find(date_header)
        .ok_or_else(|| InputError::MissingColumn {
            header: date_header.to_string(),
        })?
        .to_string();

    let patient_columns: Vec<String> = patient_candidates
        .iter()
        .filter_map(|candidate| lookup.find(candidate).map(str::to_string))
        .collect();
    if patient_columns.is_empty() {
        return Err(InputError::MissingColumn {
            header: patient_candidates.first().cloned().unwrap_or_default(),
        }
        .into());
    }

    let mut outcome = MetricOutcome {
        date_column,
        patient_columns,
        ..MetricOutcome::default()
    };
    let mut per_day: BTreeMap<NaiveDate, HashSet<&str>> = BTreeMap::new();

    for row in rows {
        outcome.rows_total += 1;

        let Some((date, format)) = parse_service_date(row.get(&outcome.date_column)) else {
            outcome.skipped_invalid_date += 1;
            continue;
        };

        let patient = outcome.patient_columns.iter().find_map(|column| {
            let value = row.get(column).trim();
            (!value.is_empty()).then_some((column, value))
        });
        let Some((source, patient)) = patient else {
            outcome.skipped_blank_patient += 1;
            continue;
        };

        per_day.entry(date).or_default().insert(patient);
        *outcome
            .date_formats
            .entry(format.pattern().to_string())
            .or_default() += 1;
        *outcome.patient_sources.entry(source.clone()).or_default() += 1;
        outcome.rows_used += 1;
    }

    outcome.rows_skipped = outcome.skipped_invalid_date + outcome.skipped_blank_patient;
    outcome.results = per_day
        .into_iter()
        .map(|(date, patients)| DailyPatientCount {
            date: date.format("%Y-%m-%d").to_string(),
            unique_patients: patients.len(),
        })
        .collect();

    tracing::info!(
        days = outcome.results.len(),
        rows_used = outcome.rows_used,
        rows_skipped = outcome.rows_skipped,
        "computed unique patients per day"
    );

    Ok(outcome)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delimiter::Delimiter;
    use crate::error::ValidatorError;
    use crate::table;

    fn candidates() -> Vec<String> {
        vec!["Patient".to_string(), "ID RAMQ".to_string()]
    }

    fn run(text: &str) -> Result<MetricOutcome> {
        let parsed = table::parse(text, Delimiter::Semicolon).unwrap();
        compute(&parsed.headers, &parsed.rows, "Date de Service", &candidates())
    }

    #[test]
    fn test_unique_patients_per_day() {
        let text = "Date de Service;Patient\n\
                    2025-01-01;P1\n\
                    2025-01-01;P1\n\
                    2025-01-01;P2\n\
                    2025-01-02;P1\n";
        let outcome = run(text).unwrap();

        assert_eq!(
            outcome.results,
            vec![
                DailyPatientCount { date: "2025-01-01".to_string(), unique_patients: 2 },
                DailyPatientCount { date: "2025-01-02".to_string(), unique_patients: 1 },
            ]
        );
        assert_eq!(outcome.rows_used, 4);
        assert_eq!(outcome.rows_skipped, 0);
    }

    #[test]
    fn test_unparseable_date_is_skipped() {
        let text = "Date de Service;Patient\nnot-a-date;P1\n2025-01-01;P2\n";
        let outcome = run(text).unwrap();

        assert_eq!(outcome.rows_total, 2);
        assert_eq!(outcome.rows_skipped, 1);
        assert_eq!(outcome.skipped_invalid_date, 1);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].unique_patients, 1);
    }

    #[test]
    fn test_all_date_formats_normalize() {
        let text = "Date de Service;Patient\n\
                    2025-09-14;A\n\
                    2025-09-14 10:30;B\n\
                    2025-09-14 10:30:15;C\n\
                    14/09/2025;D\n\
                    14-09-2025;E\n\
                    2025/09/14;F\n\
                    2025-09-14T10:30:00;G\n";
        let outcome = run(text).unwrap();

        assert_eq!(outcome.rows_used, 7);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].date, "2025-09-14");
        assert_eq!(outcome.results[0].unique_patients, 7);
        assert_eq!(outcome.date_formats.len(), 7);
        assert_eq!(outcome.date_formats.get("%Y-%m-%dT*"), Some(&1));
        assert!(outcome.date_formats.keys().all(|k| k.is_ascii()));
    }

    #[test]
    fn test_patient_fallback_is_per_row() {
        let text = "Date de Service;Patient;ID RAMQ\n\
                    2025-01-01;P1;R1\n\
                    2025-01-01;;R2\n\
                    2025-01-01;  ;\n";
        let outcome = run(text).unwrap();

        assert_eq!(outcome.rows_used, 2);
        assert_eq!(outcome.skipped_blank_patient, 1);
        assert_eq!(outcome.results[0].unique_patients, 2);
        assert_eq!(outcome.patient_sources.get("Patient"), Some(&1));
        assert_eq!(outcome.patient_sources.get("ID RAMQ"), Some(&1));
    }

    #[test]
    fn test_identifiers_compare_exactly() {
        let text = "Date de Service;Patient\n2025-01-01;p1\n2025-01-01;P1\n2025-01-01; P1 \n";
        let outcome = run(text).unwrap();
        // Surrounding blanks are trimmed; case is not folded
        assert_eq!(outcome.results[0].unique_patients, 2);
    }

    #[test]
    fn test_headers_resolved_leniently() {
        let text = " date de service ;PATIENT\n2025-01-01;P1\n";
        let outcome = run(text).unwrap();
        assert_eq!(outcome.date_column, " date de service ");
        assert_eq!(outcome.patient_columns, vec!["PATIENT"]);
    }

    #[test]
    fn test_missing_columns_are_input_errors() {
        let err = run("Patient\nP1\n").unwrap_err();
        assert!(matches!(
            err,
            ValidatorError::Input(InputError::MissingColumn { ref header }) if header == "Date de Service"
        ));

        let err = run("Date de Service;Code\n2025-01-01;X\n").unwrap_err();
        assert!(matches!(
            err,
            ValidatorError::Input(InputError::MissingColumn { ref header }) if header == "Patient"
        ));
    }

    #[test]
    fn test_parse_service_date() {
        assert_eq!(
            parse_service_date(" 01/02/2025 "),
            Some((NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(), DateFormat::DayMonthYearSlash))
        );
        assert_eq!(parse_service_date("2025-13-01"), None);
        assert_eq!(parse_service_date(""), None);
    }
}
