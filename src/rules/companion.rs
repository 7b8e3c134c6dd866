// 🔗 Required-Companion-Code Rule
// A billing code that, when present on an invoice/doctor group, mandates the
// co-presence of other codes in the same group.

use super::{Finding, FindingContext, RuleKind};
use crate::table::Record;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// RULE DEFINITION
// ============================================================================

/// One row of the companion-code table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionCodeRule {
    pub code: String,
    pub requires_code: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CompanionCodeRule {
    pub fn new(code: &str, requires_code: &str, active: bool) -> Self {
        CompanionCodeRule {
            code: code.to_string(),
            requires_code: requires_code.to_string(),
            active,
            note: None,
        }
    }

    /// Builder pattern: add a note
    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }
}

/// Columns used to group rows and read codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingFields {
    pub facture: String,
    pub doctor: String,
    pub code: String,
}

impl Default for GroupingFields {
    fn default() -> Self {
        GroupingFields {
            facture: "Facture".to_string(),
            doctor: "Doctor Info".to_string(),
            code: "Code".to_string(),
        }
    }
}

// ============================================================================
// COMPANION INDEX
// ============================================================================

/// code → set of codes it requires, built from active rules only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompanionCodeIndex {
    required: BTreeMap<String, BTreeSet<String>>,
}

impl CompanionCodeIndex {
    pub fn from_rules<I>(rules: I) -> Self
    where
        I: IntoIterator<Item = CompanionCodeRule>,
    {
        let mut required: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for rule in rules.into_iter().filter(|r| r.active) {
            required.entry(rule.code).or_default().insert(rule.requires_code);
        }
        CompanionCodeIndex { required }
    }

    pub fn companions_of(&self, code: &str) -> Option<&BTreeSet<String>> {
        self.required.get(code)
    }

    /// Number of codes that have at least one required companion.
    pub fn len(&self) -> usize {
        self.required.len()
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }

    /// Number of (code, requires_code) pairs.
    pub fn pair_count(&self) -> usize {
        self.required.values().map(BTreeSet::len).sum()
    }
}

// ============================================================================
// EVALUATION
// ============================================================================

/// Group rows by exact (invoice, doctor) pair and emit one finding per
/// (group, code) whose required companions are not all in the group.
/// Codes compare as exact, case-sensitive strings; empty codes are ignored.
pub fn evaluate(
    rows: &[Record],
    index: &CompanionCodeIndex,
    facture_field: &str,
    doctor_field: &str,
    code_field: &str,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    if index.is_empty() {
        return findings;
    }

    let mut groups: BTreeMap<(&str, &str), BTreeSet<&str>> = BTreeMap::new();
    for row in rows {
        let codes = groups
            .entry((row.get(facture_field), row.get(doctor_field)))
            .or_default();
        let code = row.get(code_field);
        if !code.is_empty() {
            codes.insert(code);
        }
    }

    for ((facture, doctor), codes_here) in &groups {
        for code in codes_here {
            let Some(required) = index.companions_of(code) else {
                continue;
            };

            let missing: Vec<String> = required
                .iter()
                .filter(|c| !codes_here.contains(c.as_str()))
                .cloned()
                .collect();
            if missing.is_empty() {
                continue;
            }

            findings.push(Finding {
                rule: RuleKind::RequiredCompanionCode,
                message: format!(
                    "Code {} requires: {} on the same invoice/doctor.",
                    code,
                    missing.join(", ")
                ),
                context: FindingContext::MissingCompanions {
                    facture: facture.to_string(),
                    doctor: doctor.to_string(),
                    code: code.to_string(),
                    missing,
                    codes_present: codes_here.iter().map(|c| c.to_string()).collect(),
                },
            });
        }
    }

    findings
}

// ============================================================================
// TESTS
// ============================================================================
