// 🔎 Delimiter Detector
// Sample-based heuristic over the first non-empty lines of the decoded text.

use serde::{Deserialize, Serialize};

/// Number of non-empty lines inspected.
pub const SAMPLE_LINES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    Semicolon,
    Comma,
    Tab,
    Pipe,
}

impl Delimiter {
    /// Candidates in tie-break priority order: semicolon first (dominant
    /// format of the claims exports), then comma.
    pub const CANDIDATES: [Delimiter; 4] = [
        Delimiter::Semicolon,
        Delimiter::Comma,
        Delimiter::Tab,
        Delimiter::Pipe,
    ];

    pub fn as_char(&self) -> char {
        match self {
            Delimiter::Semicolon => ';',
            Delimiter::Comma => ',',
            Delimiter::Tab => '\t',
            Delimiter::Pipe => '|',
        }
    }

    pub fn as_byte(&self) -> u8 {
        self.as_char() as u8
    }

    /// Name reported back to clients as the delimiter hint.
    pub fn hint(&self) -> &'static str {
        match self {
            Delimiter::Semicolon => "semicolon",
            Delimiter::Comma => "comma",
            Delimiter::Tab => "tab",
            Delimiter::Pipe => "pipe",
        }
    }

    pub fn from_char(c: char) -> Option<Delimiter> {
        Delimiter::CANDIDATES.into_iter().find(|d| d.as_char() == c)
    }
}

impl std::fmt::Display for Delimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DelimiterDetection {
    pub delimiter: Delimiter,
    /// True when no candidate occurred in the sample and comma was assumed.
    pub fallback: bool,
}

/// Pick the candidate with the highest occurrence count across the first
/// [`SAMPLE_LINES`] non-empty lines. Ties go to the earlier candidate in
/// [`Delimiter::CANDIDATES`]. An empty sample, or one without any candidate,
/// defaults to comma.
///
/// Heuristic: a single-column file whose values contain commas will be
/// misdetected.
pub fn detect(text: &str) -> DelimiterDetection {
    let sample: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(SAMPLE_LINES)
        .collect();

    let mut best: Option<(Delimiter, usize)> = None;
    for candidate in Delimiter::CANDIDATES {
        let c = candidate.as_char();
        let count: usize = sample.iter().map(|line| line.matches(c).count()).sum();
        // Strict '>' keeps the earlier (higher-priority) candidate on ties
        if count > 0 && best.map_or(true, |(_, top)| count > top) {
            best = Some((candidate, count));
        }
    }

    let detection = match best {
        Some((delimiter, _)) => DelimiterDetection {
            delimiter,
            fallback: false,
        },
        None => DelimiterDetection {
            delimiter: Delimiter::Comma,
            fallback: true,
        },
    };

    tracing::debug!(
        delimiter = detection.delimiter.hint(),
        fallback = detection.fallback,
        lines = sample.len(),
        "detected delimiter"
    );

    detection
}

// ============================================================================
// TESTS
// ============================================================================
