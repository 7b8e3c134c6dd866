// 🗄️ Rule Store - SQLite (rusqlite)
// Rule definitions live in the database as data. One RuleStore owns one
// connection; it is opened per request and released when dropped.

use crate::delimiter;
use crate::error::{ConfigError, InputError, Result};
use crate::header::HeaderLookup;
use crate::rules::required_headers::{self, RequiredHeadersParams};
use crate::rules::{CompanionCodeIndex, CompanionCodeRule};
use crate::table;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Counts reported by a bulk companion-rule import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

pub struct RuleStore {
    conn: Connection,
}

impl RuleStore {
    /// Open the store at `path`. Each caller gets its own connection, so
    /// concurrent readers never share mutable state.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(RuleStore { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(RuleStore {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ========================================================================
    // SCHEMA
    // ========================================================================

    pub fn setup_database(&self) -> Result<()> {
        // WAL lets readers proceed while a writer holds the database
        self.conn.pragma_update(None, "journal_mode", "WAL")?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT UNIQUE NOT NULL,
                name TEXT UNIQUE NOT NULL,
                description TEXT,
                category TEXT NOT NULL,
                severity TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                params TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS required_companion_codes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL,
                requires_code TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                note TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(code, requires_code)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_companion_active ON required_companion_codes(active)",
            [],
        )?;

        // Reference data
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS codes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                is_active INTEGER NOT NULL DEFAULT 1
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS establishments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                number TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                city TEXT,
                region_code TEXT,
                is_active INTEGER NOT NULL DEFAULT 1
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS contexts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT UNIQUE NOT NULL,
                value TEXT NOT NULL,
                description TEXT
            )",
            [],
        )?;

        Ok(())
    }

    // ========================================================================
    // REQUIRED HEADERS RULE
    // ========================================================================

    /// Insert or update the `required_headers` rule row.
    pub fn save_required_headers(&self, params: &RequiredHeadersParams) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let blob = params.to_json()?;
        self.conn.execute(
            "INSERT INTO rules (code, name, description, category, severity, is_active, params, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?7)
             ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                category = excluded.category,
                severity = excluded.severity,
                is_active = 1,
                params = excluded.params,
                updated_at = excluded.updated_at",
            params![
                "REQUIRED_HEADERS",
                required_headers::RULE_NAME,
                "Validates that all mandatory CSV headers are present (extras allowed).",
                "input_format",
                "error",
                blob,
                now,
            ],
        )?;

        tracing::info!(
            headers = params.required_headers.len(),
            "saved required_headers rule"
        );
        Ok(())
    }

    /// Seed the default claims-export header list.
    pub fn seed_required_headers_rule(&self) -> Result<()> {
        self.save_required_headers(&RequiredHeadersParams::claims_export())
    }

    /// Load and validate the `required_headers` params. A missing row or a
    /// malformed blob is a configuration error, never defaulted.
    pub fn load_required_headers(&self) -> Result<RequiredHeadersParams> {
        let row: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT params FROM rules WHERE name = ?1",
                params![required_headers::RULE_NAME],
                |row| row.get(0),
            )
            .optional()?;

        let name = required_headers::RULE_NAME.to_string();
        let blob = match row {
            None => return Err(ConfigError::RuleNotFound { name }.into()),
            Some(None) => return Err(ConfigError::MissingParams { name }.into()),
            Some(Some(blob)) => blob,
        };

        Ok(RequiredHeadersParams::from_json(&blob)?)
    }

    // ========================================================================
    // COMPANION CODES
    // ========================================================================

    pub fn upsert_companion_rule(&self, rule: &CompanionCodeRule) -> Result<UpsertOutcome> {
        let now = Utc::now().to_rfc3339();

        let existing: Option<(bool, Option<String>)> = self
            .conn
            .query_row(
                "SELECT active, note FROM required_companion_codes
                 WHERE code = ?1 AND requires_code = ?2",
                params![rule.code, rule.requires_code],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO required_companion_codes (code, requires_code, active, note, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![rule.code, rule.requires_code, rule.active, rule.note, now],
                )?;
                Ok(UpsertOutcome::Inserted)
            }
            Some((active, note)) if active == rule.active && note == rule.note => {
                Ok(UpsertOutcome::Unchanged)
            }
            Some(_) => {
                self.conn.execute(
                    "UPDATE required_companion_codes
                        SET active = ?3, note = ?4, updated_at = ?5
                      WHERE code = ?1 AND requires_code = ?2",
                    params![rule.code, rule.requires_code, rule.active, rule.note, now],
                )?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    pub fn load_companion_rules(&self, active_only: bool) -> Result<Vec<CompanionCodeRule>> {
        let mut stmt = self.conn.prepare(
            "SELECT code, requires_code, active, note FROM required_companion_codes
             WHERE (?1 = 0 OR active = 1)
             ORDER BY code, requires_code",
        )?;

        let rules = stmt
            .query_map(params![active_only], |row| {
                Ok(CompanionCodeRule {
                    code: row.get(0)?,
                    requires_code: row.get(1)?,
                    active: row.get(2)?,
                    note: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rules)
    }

    /// Fresh index of active rules; rebuilt on every call.
    pub fn load_companion_index(&self) -> Result<CompanionCodeIndex> {
        let rules = self.load_companion_rules(true)?;
        let index = CompanionCodeIndex::from_rules(rules);
        tracing::debug!(
            codes = index.len(),
            pairs = index.pair_count(),
            "loaded companion index"
        );
        Ok(index)
    }

    /// Bulk upsert from delimited text with headers `code`, `requires_code`,
    /// `active` and optionally `note`. Rows with a blank code are skipped.
    pub fn import_companion_rules(&self, text: &str) -> Result<ImportSummary> {
        let detection = delimiter::detect(text);
        let parsed = table::parse(text, detection.delimiter)?;

        let lookup = HeaderLookup::lenient(&parsed.headers);
        let column = |name: &str| -> Result<String> {
            lookup.find(name).map(str::to_string).ok_or_else(|| {
                InputError::MissingColumn {
                    header: name.to_string(),
                }
                .into()
            })
        };
        let code_col = column("code")?;
        let requires_col = column("requires_code")?;
        let active_col = column("active")?;
        let note_col = lookup.find("note").map(str::to_string);

        let tx = self.conn.unchecked_transaction()?;
        let mut summary = ImportSummary::default();

        for row in &parsed.rows {
            summary.processed += 1;

            let code = row.get(&code_col).trim();
            let requires_code = row.get(&requires_col).trim();
            if code.is_empty() || requires_code.is_empty() {
                summary.skipped += 1;
                continue;
            }

            let mut rule = CompanionCodeRule::new(code, requires_code, parse_bool(row.get(&active_col)));
            if let Some(col) = &note_col {
                let note = row.get(col).trim();
                if !note.is_empty() {
                    rule = rule.with_note(note);
                }
            }

            match self.upsert_companion_rule(&rule)? {
                UpsertOutcome::Inserted => summary.inserted += 1,
                UpsertOutcome::Updated => summary.updated += 1,
                UpsertOutcome::Unchanged => summary.unchanged += 1,
            }
        }

        tx.commit()?;
        tracing::info!(
            processed = summary.processed,
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            "imported companion rules"
        );
        Ok(summary)
    }
}

/// `1`, `true`, `yes`, `y` (any case) are true; everything else is false.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y"
    )
}

// ============================================================================
// TESTS
// ============================================================================
