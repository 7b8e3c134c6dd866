// End-to-end: file-backed rule store → ingest / metrics

use claims_validator::{
    ingest, unique_patients, FieldBindings, FindingContext, RawUpload, RuleKind, RuleStore,
    ValidatorError,
};
use tempfile::TempDir;

const COMPANIONS: &str = "code,requires_code,active,note\n\
                          15802,19957,1,dressing\n\
                          15802,19958,yes,\n\
                          09999,00001,0,retired\n";

fn seeded_store(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("rules.db");
    let store = RuleStore::open(&path).unwrap();
    store.setup_database().unwrap();
    store.seed_required_headers_rule().unwrap();
    store.import_companion_rules(COMPANIONS).unwrap();
    path
}

fn claims_export(rows: &[&str]) -> Vec<u8> {
    let header = claims_validator::rules::required_headers::CLAIMS_EXPORT_HEADERS.join(";");
    let mut text = format!("\u{feff}{}\n", header);
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    text.into_bytes()
}

/// Build a row matching the claims-export header order.
fn row(facture: &str, doctor: &str, code: &str, date: &str, patient: &str) -> String {
    claims_validator::rules::required_headers::CLAIMS_EXPORT_HEADERS
        .iter()
        .map(|h| match *h {
            "Facture" => facture,
            "Doctor Info" => doctor,
            "Code" => code,
            "Date de Service" => date,
            "Patient" => patient,
            _ => "",
        })
        .collect::<Vec<_>>()
        .join(";")
}

#[test]
fn test_valid_export_passes_all_rules() {
    let dir = TempDir::new().unwrap();
    let path = seeded_store(&dir);

    let store = RuleStore::open(&path).unwrap();
    let params = store.load_required_headers().unwrap();
    let index = store.load_companion_index().unwrap();
    drop(store);

    let rows = [
        row("F1", "D1", "15802", "2025-01-01", "P1"),
        row("F1", "D1", "19957", "2025-01-01", "P1"),
        row("F1", "D1", "19958", "2025-01-01", "P1"),
        // Inactive rule must not fire
        row("F2", "D1", "09999", "2025-01-02", "P2"),
    ];
    let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
    let upload = RawUpload::new(claims_export(&rows), Some("ok.csv".to_string()));

    let report = ingest(&upload, &params, &index, &FieldBindings::default()).unwrap();

    assert!(report.valid, "unexpected findings: {:?}", report.errors);
    assert_eq!(report.encoding, "utf-8-sig");
    assert_eq!(report.delimiter_hint, "semicolon");
    assert_eq!(report.row_count, 4);
    assert!(report.missing_headers.is_empty());
}

#[test]
fn test_missing_companion_and_header_are_reported() {
    let dir = TempDir::new().unwrap();
    let path = seeded_store(&dir);

    let store = RuleStore::open(&path).unwrap();
    let params = store.load_required_headers().unwrap();
    let index = store.load_companion_index().unwrap();
    drop(store);

    // Drop the "Patient" column entirely and leave 19958 off invoice F1
    let text = "Facture;Doctor Info;Code\nF1;D1;15802\nF1;D1;19957\n";
    let upload = RawUpload::new(text.as_bytes().to_vec(), Some("bad.csv".to_string()));

    let report = ingest(&upload, &params, &index, &FieldBindings::default()).unwrap();

    assert!(!report.valid);
    assert!(report.missing_headers.contains(&"Patient".to_string()));
    assert_eq!(report.errors[0].rule, RuleKind::RequiredHeaders);

    let companion = report
        .errors
        .iter()
        .find(|f| f.rule == RuleKind::RequiredCompanionCode)
        .expect("companion finding");
    match &companion.context {
        FindingContext::MissingCompanions { facture, doctor, code, missing, .. } => {
            assert_eq!(facture, "F1");
            assert_eq!(doctor, "D1");
            assert_eq!(code, "15802");
            assert_eq!(missing, &vec!["19958".to_string()]);
        }
        other => panic!("unexpected context: {:?}", other),
    }

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["valid"], false);
    assert_eq!(json["filename"], "bad.csv");
}

#[test]
fn test_unseeded_store_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.db");

    let store = RuleStore::open(&path).unwrap();
    store.setup_database().unwrap();
    let err = store.load_required_headers().unwrap_err();

    assert!(matches!(err, ValidatorError::Config(_)));
    assert!(!err.is_client_error());
}

#[test]
fn test_metrics_over_claims_export() {
    let rows = [
        row("F1", "D1", "15802", "2025-01-01", "P1"),
        row("F2", "D1", "15802", "01/01/2025", "P1"),
        row("F3", "D2", "15802", "2025-01-01 08:15", "P2"),
        row("F4", "D2", "15802", "2025-01-02", "P3"),
        row("F5", "D2", "15802", "", "P4"),
    ];
    let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
    let upload = RawUpload::new(claims_export(&rows), Some("metrics.csv".to_string()));

    let report = unique_patients(&upload, &FieldBindings::default()).unwrap();

    let counts: Vec<(&str, usize)> = report
        .results
        .iter()
        .map(|r| (r.date.as_str(), r.unique_patients))
        .collect();
    assert_eq!(counts, vec![("2025-01-01", 2), ("2025-01-02", 1)]);
    assert_eq!(report.meta.rows_total, 5);
    assert_eq!(report.meta.rows_skipped, 1);
    assert_eq!(report.meta.skipped_invalid_date, 1);
}

#[test]
fn test_concurrent_requests_read_same_rules() {
    let dir = TempDir::new().unwrap();
    let path = seeded_store(&dir);

    let expected = {
        let store = RuleStore::open(&path).unwrap();
        (store.load_required_headers().unwrap(), store.load_companion_index().unwrap())
    };

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let path = path.clone();
            std::thread::spawn(move || {
                (0..20)
                    .map(|_| -> Result<_, ValidatorError> {
                        // One connection per request, as the server does
                        let store = RuleStore::open(&path)?;
                        Ok((store.load_required_headers()?, store.load_companion_index()?))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
        })
        .collect();

    for handle in handles {
        let loads = handle.join().unwrap().unwrap();
        assert_eq!(loads.len(), 20);
        for (params, index) in loads {
            assert_eq!(params, expected.0);
            assert_eq!(index, expected.1);
        }
    }
}
