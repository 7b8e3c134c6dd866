// 📚 Reference Data - billing codes, establishments, contexts
// Lookup tables kept next to the rules in the same store. Loaded from
// delimited text by upsert; read back as plain lists.

use crate::delimiter;
use crate::error::{InputError, Result, ValidatorError};
use crate::header::HeaderLookup;
use crate::store::{parse_bool, ImportSummary, RuleStore, UpsertOutcome};
use crate::table::{self, ParsedTable};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

// ============================================================================
// CORE TYPES
// ============================================================================

/// A billing code, e.g. `19928` "Consultation de base".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCode {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Establishment {
    /// Establishment number, e.g. `54055`
    pub number: String,
    pub name: String,
    pub city: Option<String>,
    /// Two-digit region, e.g. `08`
    pub region_code: Option<String>,
    pub is_active: bool,
}

/// A context element (`after_hours` → `Y`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
}

pub const CODE_COLUMNS: [&str; 4] = ["code", "name", "description", "is_active"];
pub const ESTABLISHMENT_COLUMNS: [&str; 5] = ["number", "name", "city", "region_code", "is_active"];
pub const CONTEXT_COLUMNS: [&str; 3] = ["key", "value", "description"];

/// Trimmed cell, `None` when blank.
fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse import text and resolve every column in `wanted` to its uploaded
/// spelling. A missing column rejects the whole file.
fn read_import(text: &str, wanted: &[&str]) -> Result<(ParsedTable, Vec<String>)> {
    let detection = delimiter::detect(text);
    let parsed = table::parse(text, detection.delimiter)?;

    let lookup = HeaderLookup::lenient(&parsed.headers);
    let columns = wanted
        .iter()
        .map(|name| {
            lookup.find(name).map(str::to_string).ok_or_else(|| {
                ValidatorError::from(InputError::MissingColumn {
                    header: name.to_string(),
                })
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((parsed, columns))
}

fn tally(summary: &mut ImportSummary, outcome: UpsertOutcome) {
    match outcome {
        UpsertOutcome::Inserted => summary.inserted += 1,
        UpsertOutcome::Updated => summary.updated += 1,
        UpsertOutcome::Unchanged => summary.unchanged += 1,
    }
}

// ============================================================================
// STORE OPERATIONS
// ============================================================================

impl RuleStore {
    // ------------------------------------------------------------------------
    // Codes
    // ------------------------------------------------------------------------

    pub fn upsert_code(&self, code: &BillingCode) -> Result<UpsertOutcome> {
        let conn = self.connection();
        let existing: Option<BillingCode> = conn
            .query_row(
                "SELECT code, name, description, is_active FROM codes WHERE code = ?1",
                params![code.code],
                |row| {
                    Ok(BillingCode {
                        code: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        is_active: row.get(3)?,
                    })
                },
            )
            .optional()?;

        match existing {
            None => {
                conn.execute(
                    "INSERT INTO codes (code, name, description, is_active) VALUES (?1, ?2, ?3, ?4)",
                    params![code.code, code.name, code.description, code.is_active],
                )?;
                Ok(UpsertOutcome::Inserted)
            }
            Some(ref current) if current == code => Ok(UpsertOutcome::Unchanged),
            Some(_) => {
                conn.execute(
                    "UPDATE codes SET name = ?2, description = ?3, is_active = ?4 WHERE code = ?1",
                    params![code.code, code.name, code.description, code.is_active],
                )?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    pub fn list_codes(&self) -> Result<Vec<BillingCode>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT code, name, description, is_active FROM codes ORDER BY code")?;
        let codes = stmt
            .query_map([], |row| {
                Ok(BillingCode {
                    code: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    is_active: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(codes)
    }

    /// Bulk upsert with columns `code,name,description,is_active`. Rows with
    /// a blank code or name are skipped.
    pub fn import_codes(&self, text: &str) -> Result<ImportSummary> {
        let (parsed, cols) = read_import(text, &CODE_COLUMNS)?;

        let tx = self.connection().unchecked_transaction()?;
        let mut summary = ImportSummary::default();
        for row in &parsed.rows {
            summary.processed += 1;
            let (Some(code), Some(name)) = (optional(row.get(&cols[0])), optional(row.get(&cols[1]))) else {
                summary.skipped += 1;
                continue;
            };
            let entry = BillingCode {
                code,
                name,
                description: optional(row.get(&cols[2])),
                is_active: parse_bool(row.get(&cols[3])),
            };
            tally(&mut summary, self.upsert_code(&entry)?);
        }
        tx.commit()?;

        tracing::info!(
            processed = summary.processed,
            inserted = summary.inserted,
            updated = summary.updated,
            "imported codes"
        );
        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Establishments
    // ------------------------------------------------------------------------

    pub fn upsert_establishment(&self, establishment: &Establishment) -> Result<UpsertOutcome> {
        let conn = self.connection();
        let existing: Option<Establishment> = conn
            .query_row(
                "SELECT number, name, city, region_code, is_active FROM establishments WHERE number = ?1",
                params![establishment.number],
                |row| {
                    Ok(Establishment {
                        number: row.get(0)?,
                        name: row.get(1)?,
                        city: row.get(2)?,
                        region_code: row.get(3)?,
                        is_active: row.get(4)?,
                    })
                },
            )
            .optional()?;

        let e = establishment;
        match existing {
            None => {
                conn.execute(
                    "INSERT INTO establishments (number, name, city, region_code, is_active)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![e.number, e.name, e.city, e.region_code, e.is_active],
                )?;
                Ok(UpsertOutcome::Inserted)
            }
            Some(ref current) if current == e => Ok(UpsertOutcome::Unchanged),
            Some(_) => {
                conn.execute(
                    "UPDATE establishments SET name = ?2, city = ?3, region_code = ?4, is_active = ?5
                      WHERE number = ?1",
                    params![e.number, e.name, e.city, e.region_code, e.is_active],
                )?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    pub fn list_establishments(&self) -> Result<Vec<Establishment>> {
        let mut stmt = self.connection().prepare(
            "SELECT number, name, city, region_code, is_active FROM establishments ORDER BY number",
        )?;
        let establishments = stmt
            .query_map([], |row| {
                Ok(Establishment {
                    number: row.get(0)?,
                    name: row.get(1)?,
                    city: row.get(2)?,
                    region_code: row.get(3)?,
                    is_active: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(establishments)
    }

    /// Bulk upsert with columns `number,name,city,region_code,is_active`.
    pub fn import_establishments(&self, text: &str) -> Result<ImportSummary> {
        let (parsed, cols) = read_import(text, &ESTABLISHMENT_COLUMNS)?;

        let tx = self.connection().unchecked_transaction()?;
        let mut summary = ImportSummary::default();
        for row in &parsed.rows {
            summary.processed += 1;
            let (Some(number), Some(name)) = (optional(row.get(&cols[0])), optional(row.get(&cols[1]))) else {
                summary.skipped += 1;
                continue;
            };
            let entry = Establishment {
                number,
                name,
                city: optional(row.get(&cols[2])),
                region_code: optional(row.get(&cols[3])),
                is_active: parse_bool(row.get(&cols[4])),
            };
            tally(&mut summary, self.upsert_establishment(&entry)?);
        }
        tx.commit()?;

        tracing::info!(
            processed = summary.processed,
            inserted = summary.inserted,
            updated = summary.updated,
            "imported establishments"
        );
        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Contexts
    // ------------------------------------------------------------------------

    pub fn upsert_context(&self, context: &ContextEntry) -> Result<UpsertOutcome> {
        let conn = self.connection();
        let existing: Option<ContextEntry> = conn
            .query_row(
                "SELECT key, value, description FROM contexts WHERE key = ?1",
                params![context.key],
                |row| {
                    Ok(ContextEntry {
                        key: row.get(0)?,
                        value: row.get(1)?,
                        description: row.get(2)?,
                    })
                },
            )
            .optional()?;

        match existing {
            None => {
                conn.execute(
                    "INSERT INTO contexts (key, value, description) VALUES (?1, ?2, ?3)",
                    params![context.key, context.value, context.description],
                )?;
                Ok(UpsertOutcome::Inserted)
            }
            Some(ref current) if current == context => Ok(UpsertOutcome::Unchanged),
            Some(_) => {
                conn.execute(
                    "UPDATE contexts SET value = ?2, description = ?3 WHERE key = ?1",
                    params![context.key, context.value, context.description],
                )?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    pub fn list_contexts(&self) -> Result<Vec<ContextEntry>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT key, value, description FROM contexts ORDER BY key")?;
        let contexts = stmt
            .query_map([], |row| {
                Ok(ContextEntry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    description: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(contexts)
    }

    /// Bulk upsert with columns `key,value,description`.
    pub fn import_contexts(&self, text: &str) -> Result<ImportSummary> {
        let (parsed, cols) = read_import(text, &CONTEXT_COLUMNS)?;

        let tx = self.connection().unchecked_transaction()?;
        let mut summary = ImportSummary::default();
        for row in &parsed.rows {
            summary.processed += 1;
            let (Some(key), Some(value)) = (optional(row.get(&cols[0])), optional(row.get(&cols[1]))) else {
                summary.skipped += 1;
                continue;
            };
            let entry = ContextEntry {
                key,
                value,
                description: optional(row.get(&cols[2])),
            };
            tally(&mut summary, self.upsert_context(&entry)?);
        }
        tx.commit()?;

        tracing::info!(
            processed = summary.processed,
            inserted = summary.inserted,
            updated = summary.updated,
            "imported contexts"
        );
        Ok(summary)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RuleStore {
        let store = RuleStore::open_in_memory().unwrap();
        store.setup_database().unwrap();
        store
    }

    #[test]
    fn test_import_codes_upserts_and_skips() {
        let store = store();
        let text = "code,name,description,is_active\n\
                    19928,Consultation de base,,1\n\
                    15802,Pansement,Petit pansement,yes\n\
                    ,Sans code,,1\n";

        let summary = store.import_codes(text).unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.skipped, 1);

        let codes = store.list_codes().unwrap();
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0].code, "15802");
        assert_eq!(codes[0].description.as_deref(), Some("Petit pansement"));
        assert_eq!(codes[1].description, None);

        // Second pass: one change, one untouched
        let text = "code,name,description,is_active\n\
                    19928,Consultation de base,,0\n\
                    15802,Pansement,Petit pansement,yes\n";
        let summary = store.import_codes(text).unwrap();
        assert_eq!((summary.updated, summary.unchanged), (1, 1));
        assert!(!store.list_codes().unwrap()[1].is_active);
    }

    #[test]
    fn test_import_establishments() {
        let store = store();
        let text = "number;name;city;region_code;is_active\n\
                    54055;CLSC Centre;Montréal;06;1\n\
                    54056;Clinique Nord;;;0\n";

        let summary = store.import_establishments(text).unwrap();
        assert_eq!(summary.inserted, 2);

        let list = store.list_establishments().unwrap();
        assert_eq!(list[0].region_code.as_deref(), Some("06"));
        assert_eq!(list[1].city, None);
        assert!(!list[1].is_active);
    }

    #[test]
    fn test_import_contexts_updates_value() {
        let store = store();
        store
            .import_contexts("key,value,description\nafter_hours,Y,Hors heures\n")
            .unwrap();
        let summary = store
            .import_contexts("key,value,description\nafter_hours,N,Hors heures\nweekend,,\n")
            .unwrap();

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.skipped, 1);
        let contexts = store.list_contexts().unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].value, "N");
    }

    #[test]
    fn test_import_rejects_missing_column() {
        let store = store();
        let err = store.import_codes("code,name,is_active\n1,A,1\n").unwrap_err();
        assert!(matches!(
            err,
            ValidatorError::Input(InputError::MissingColumn { ref header }) if header == "description"
        ));
        assert!(store.list_codes().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_code_outcomes() {
        let store = store();
        let code = BillingCode {
            code: "19928".to_string(),
            name: "Consultation de base".to_string(),
            description: Some("Test seed row".to_string()),
            is_active: true,
        };

        assert_eq!(store.upsert_code(&code).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_code(&code).unwrap(), UpsertOutcome::Unchanged);

        let renamed = BillingCode {
            name: "Consultation".to_string(),
            ..code
        };
        assert_eq!(store.upsert_code(&renamed).unwrap(), UpsertOutcome::Updated);
    }
}
