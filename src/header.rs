// 🏷️ Header Normalizer
// Canonical form of a header, used only for comparison. Reporting always
// uses the original string.

use std::collections::HashMap;

const BOM: char = '\u{feff}';
const NBSP: char = '\u{a0}';

/// Canonicalize a header string.
///
/// - BOM artifacts are always removed
/// - non-breaking spaces are always folded to plain spaces
/// - `trim_whitespace`: strip leading/trailing whitespace
/// - `case_insensitive`: full case fold (not only ASCII lower-casing)
///
/// The function is idempotent for every input and flag combination.
pub fn normalize(header: &str, case_insensitive: bool, trim_whitespace: bool) -> String {
    let mut canonical: String = header
        .chars()
        .filter(|&c| c != BOM)
        .map(|c| if c == NBSP { ' ' } else { c })
        .collect();

    if trim_whitespace {
        canonical = canonical.trim().to_string();
    }
    if case_insensitive {
        canonical = fold_case(&canonical);
    }
    canonical
}

/// Unicode default case folding (full mappings), e.g. `ß` → `ss`,
/// `ſ` → `s`, `ﬁ` → `fi`, `µ` → `μ`.
pub fn fold_case(s: &str) -> String {
    caseless::default_case_fold_str(s)
}

// ============================================================================
// HEADER LOOKUP
// ============================================================================

/// Resolves wanted header names against the headers of an uploaded file by
/// canonical form. The first uploaded header wins when two share a form.
#[derive(Debug, Clone)]
pub struct HeaderLookup {
    by_canonical: HashMap<String, String>,
    case_insensitive: bool,
    trim_whitespace: bool,
}

impl HeaderLookup {
    pub fn new<S: AsRef<str>>(headers: &[S], case_insensitive: bool, trim_whitespace: bool) -> Self {
        let mut by_canonical = HashMap::with_capacity(headers.len());
        for header in headers {
            let header = header.as_ref();
            by_canonical
                .entry(normalize(header, case_insensitive, trim_whitespace))
                .or_insert_with(|| header.to_string());
        }
        HeaderLookup {
            by_canonical,
            case_insensitive,
            trim_whitespace,
        }
    }

    /// Trimmed, case-insensitive lookup.
    pub fn lenient<S: AsRef<str>>(headers: &[S]) -> Self {
        Self::new(headers, true, true)
    }

    /// The uploaded header (original spelling) matching `wanted`, if any.
    pub fn find(&self, wanted: &str) -> Option<&str> {
        self.by_canonical
            .get(&normalize(wanted, self.case_insensitive, self.trim_whitespace))
            .map(String::as_str)
    }

    pub fn contains_canonical(&self, canonical: &str) -> bool {
        self.by_canonical.contains_key(canonical)
    }
}

// ============================================================================
// TESTS
// ============================================================================
