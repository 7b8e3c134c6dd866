// 🔤 Decoder - raw upload bytes → text
// Explicit fallback chain: UTF-8 with BOM → UTF-8 → Latin-1 → lossy UTF-8.
// Never fails; the strategy that won is always reported.

use encoding_rs::WINDOWS_1252;
use serde::{Deserialize, Serialize};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

// ============================================================================
// ENCODING STRATEGIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    /// UTF-8 with a leading byte-order mark (stripped)
    Utf8Sig,
    Utf8,
    /// ISO-8859-1, decoded through its windows-1252 superset
    Latin1,
    /// Last resort: invalid sequences replaced with U+FFFD
    Utf8Lossy,
}

impl TextEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Utf8Sig => "utf-8-sig",
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "latin-1",
            TextEncoding::Utf8Lossy => "utf-8-lossy",
        }
    }

    /// Try this strategy; `None` means "does not apply, try the next one".
    fn try_decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8Sig => {
                let rest = bytes.strip_prefix(UTF8_BOM)?;
                std::str::from_utf8(rest).ok().map(str::to_owned)
            }
            TextEncoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_owned),
            TextEncoding::Latin1 => {
                // A UTF-8 BOM in front of non-UTF-8 bytes would decode to "ï»¿"
                let rest = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                WINDOWS_1252
                    .decode_without_bom_handling_and_without_replacement(rest)
                    .map(|text| text.into_owned())
            }
            TextEncoding::Utf8Lossy => {
                let rest = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                Some(String::from_utf8_lossy(rest).into_owned())
            }
        }
    }
}

/// Strategies tried in order. `Utf8Lossy` always succeeds, so the chain
/// always produces text.
pub const DECODE_CHAIN: [TextEncoding; 4] = [
    TextEncoding::Utf8Sig,
    TextEncoding::Utf8,
    TextEncoding::Latin1,
    TextEncoding::Utf8Lossy,
];

// ============================================================================
// DECODED TEXT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: TextEncoding,
}

/// Decode raw bytes, trying each strategy of [`DECODE_CHAIN`] in turn.
pub fn decode(bytes: &[u8]) -> DecodedText {
    for strategy in DECODE_CHAIN {
        if let Some(text) = strategy.try_decode(bytes) {
            tracing::debug!(encoding = strategy.name(), bytes = bytes.len(), "decoded upload");
            return DecodedText {
                text,
                encoding: strategy,
            };
        }
    }

    // Unreachable in practice: the lossy strategy never declines.
    DecodedText {
        text: String::from_utf8_lossy(bytes).into_owned(),
        encoding: TextEncoding::Utf8Lossy,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_with_bom_is_stripped() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("Facture;Début\n".as_bytes());

        let decoded = decode(&bytes);
        assert_eq!(decoded.encoding, TextEncoding::Utf8Sig);
        assert_eq!(decoded.text, "Facture;Début\n");
    }

    #[test]
    fn test_plain_utf8() {
        let decoded = decode("Unités;Règle".as_bytes());
        assert_eq!(decoded.encoding, TextEncoding::Utf8);
        assert_eq!(decoded.text, "Unités;Règle");
    }

    #[test]
    fn test_latin1_fallback() {
        // "Début" in ISO-8859-1: é = 0xE9, invalid as UTF-8
        let bytes = [b'D', 0xE9, b'b', b'u', b't'];
        let decoded = decode(&bytes);
        assert_eq!(decoded.encoding, TextEncoding::Latin1);
        assert_eq!(decoded.text, "Début");
    }

    #[test]
    fn test_bom_stripped_before_latin1_fallback() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"#;Facture;Unit\xE9s\n");

        let decoded = decode(&bytes);
        assert_eq!(decoded.encoding, TextEncoding::Latin1);
        assert_eq!(decoded.text, "#;Facture;Unités\n");
    }

    #[test]
    fn test_empty_input_decodes_to_empty_text() {
        let decoded = decode(&[]);
        assert_eq!(decoded.encoding, TextEncoding::Utf8);
        assert!(decoded.text.is_empty());
    }

    #[test]
    fn test_lossy_strategy_replaces_invalid_sequences() {
        let text = TextEncoding::Utf8Lossy
            .try_decode(&[b'a', 0xFF, b'b'])
            .unwrap();
        assert_eq!(text, "a\u{FFFD}b");
    }
}
