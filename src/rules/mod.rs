// 🏷️ Validation Rules - Rules as Data
// A closed set of rule kinds, parameterized by data loaded from the rule
// store, run in a fixed order by the engine.

pub mod companion;
pub mod required_headers;

use crate::table::Record;
use serde::{Deserialize, Serialize};

pub use companion::{CompanionCodeIndex, CompanionCodeRule, GroupingFields};
pub use required_headers::RequiredHeadersParams;

// ============================================================================
// FINDINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    RequiredHeaders,
    RequiredCompanionCode,
}

impl RuleKind {
    /// Identifier reported in findings and used as the store row name.
    pub fn id(&self) -> &'static str {
        match self {
            RuleKind::RequiredHeaders => "required_headers",
            RuleKind::RequiredCompanionCode => "required_companion_code",
        }
    }

    /// Execution order within the engine (lower runs first).
    pub fn priority(&self) -> u8 {
        match self {
            RuleKind::RequiredHeaders => 0,
            RuleKind::RequiredCompanionCode => 1,
        }
    }
}

/// Rule-specific context attached to a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FindingContext {
    MissingHeaders {
        /// Rule-parameter order, rule-parameter casing
        missing: Vec<String>,
    },
    MissingCompanions {
        facture: String,
        doctor: String,
        code: String,
        /// Sorted
        missing: Vec<String>,
        /// Sorted, every distinct non-empty code of the group
        codes_present: Vec<String>,
    },
}

/// One rule violation. An expected output of a successful run, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub rule: RuleKind,
    pub message: String,
    #[serde(flatten)]
    pub context: FindingContext,
}

// ============================================================================
// RULE DEFINITION
// ============================================================================

/// One configured rule. New kinds are added as variants, not looked up by name.
#[derive(Debug, Clone)]
pub enum Rule {
    RequiredHeaders(RequiredHeadersParams),
    RequiredCompanionCodes {
        index: CompanionCodeIndex,
        fields: GroupingFields,
    },
}

impl Rule {
    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::RequiredHeaders(_) => RuleKind::RequiredHeaders,
            Rule::RequiredCompanionCodes { .. } => RuleKind::RequiredCompanionCode,
        }
    }

    pub fn evaluate(&self, headers: &[String], rows: &[Record]) -> Vec<Finding> {
        match self {
            Rule::RequiredHeaders(params) => required_headers::evaluate(headers, params),
            Rule::RequiredCompanionCodes { index, fields } => companion::evaluate(
                rows,
                index,
                &fields.facture,
                &fields.doctor,
                &fields.code,
            ),
        }
    }
}

// ============================================================================
// RULE ENGINE
// ============================================================================

pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    /// Create a new empty rule engine
    pub fn new() -> Self {
        RuleEngine { rules: Vec::new() }
    }

    /// The standard registry: required headers, then required companion codes.
    pub fn standard(
        params: RequiredHeadersParams,
        index: CompanionCodeIndex,
        fields: GroupingFields,
    ) -> Self {
        let mut engine = RuleEngine::new();
        engine.add_rule(Rule::RequiredHeaders(params));
        engine.add_rule(Rule::RequiredCompanionCodes { index, fields });
        engine
    }

    /// Add a rule; the registry stays sorted by rule priority.
    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
        // Stable sort keeps insertion order among rules of the same kind
        self.rules.sort_by_key(|r| r.kind().priority());
    }

    /// Run every rule in order and concatenate the findings. Never stops
    /// early: later rules run even when earlier ones found problems.
    pub fn run_all(&self, headers: &[String], rows: &[Record]) -> Vec<Finding> {
        let mut findings = Vec::new();
        for rule in &self.rules {
            let found = rule.evaluate(headers, rows);
            tracing::debug!(rule = rule.kind().id(), findings = found.len(), "rule evaluated");
            findings.extend(found);
        }
        findings
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn kinds(&self) -> Vec<RuleKind> {
        self.rules.iter().map(Rule::kind).collect()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the standard rule set over one parsed file.
pub fn run_all(
    rows: &[Record],
    headers: &[String],
    params: &RequiredHeadersParams,
    index: &CompanionCodeIndex,
    fields: &GroupingFields,
) -> Vec<Finding> {
    RuleEngine::standard(params.clone(), index.clone(), fields.clone()).run_all(headers, rows)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delimiter::Delimiter;
    use crate::table;

    fn params(required: &[&str]) -> RequiredHeadersParams {
        RequiredHeadersParams {
            required_headers: required.iter().map(|s| s.to_string()).collect(),
            delimiter: ";".to_string(),
            ignore_extras: true,
            case_insensitive: true,
            trim_whitespace: true,
        }
    }

    fn index(pairs: &[(&str, &str)]) -> CompanionCodeIndex {
        CompanionCodeIndex::from_rules(
            pairs
                .iter()
                .map(|(code, req)| CompanionCodeRule::new(code, req, true)),
        )
    }

    #[test]
    fn test_rule_order_is_fixed() {
        let mut engine = RuleEngine::new();
        engine.add_rule(Rule::RequiredCompanionCodes {
            index: CompanionCodeIndex::default(),
            fields: GroupingFields::default(),
        });
        engine.add_rule(Rule::RequiredHeaders(params(&["Code"])));

        assert_eq!(
            engine.kinds(),
            vec![RuleKind::RequiredHeaders, RuleKind::RequiredCompanionCode]
        );
        assert_eq!(engine.rule_count(), 2);
    }

    #[test]
    fn test_run_all_does_not_short_circuit() {
        // "Patient" missing AND 15802 lacks its companion 19957
        let text = "Facture;Doctor Info;Code\nF1;D1;15802\n";
        let parsed = table::parse(text, Delimiter::Semicolon).unwrap();

        let findings = run_all(
            &parsed.rows,
            &parsed.headers,
            &params(&["Facture", "Code", "Patient"]),
            &index(&[("15802", "19957")]),
            &GroupingFields::default(),
        );

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].rule, RuleKind::RequiredHeaders);
        assert_eq!(findings[1].rule, RuleKind::RequiredCompanionCode);
    }

    #[test]
    fn test_clean_file_has_no_findings() {
        let text = "Facture;Doctor Info;Code\nF1;D1;15802\nF1;D1;19957\n";
        let parsed = table::parse(text, Delimiter::Semicolon).unwrap();

        let findings = run_all(
            &parsed.rows,
            &parsed.headers,
            &params(&["facture", "CODE"]),
            &index(&[("15802", "19957")]),
            &GroupingFields::default(),
        );

        assert!(findings.is_empty());
    }

    #[test]
    fn test_finding_json_shape() {
        let finding = Finding {
            rule: RuleKind::RequiredHeaders,
            message: "Missing required header(s): Patient".to_string(),
            context: FindingContext::MissingHeaders {
                missing: vec!["Patient".to_string()],
            },
        };

        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["rule"], "required_headers");
        assert_eq!(json["missing"][0], "Patient");
        assert!(json.get("MissingHeaders").is_none());
    }
}
