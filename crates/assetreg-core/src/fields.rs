//! Key/value extraction from recognized document text.
//!
//! The registration flow pre-fills asset fields from OCR output. Only a small,
//! fixed set of patterns is recognized; anything else is left to officers.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

/// Extracted field name to value.
pub type ExtractedFields = BTreeMap<String, String>;

/// Field holding the ownership document number, normalized to `DOC-<digits>`.
pub const OWNERSHIP_DOCUMENT_NUMBER: &str = "OwnershipDocumentNumber";

/// Field holding the first ISO-like date found in the text.
pub const DOCUMENT_DATE: &str = "DocumentDate";

fn doc_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bDOC[-\s]*([0-9]{3,})\b").expect("valid regex"))
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(20\d{2}[-/]\d{1,2}[-/]\d{1,2})\b").expect("valid regex"))
}

/// Extract known fields from OCR text.
///
/// ```
/// use assetreg_core::fields::{extract_fields, OWNERSHIP_DOCUMENT_NUMBER};
///
/// let fields = extract_fields("Title deed doc 00451 issued 2024-03-07");
/// assert_eq!(fields[OWNERSHIP_DOCUMENT_NUMBER], "DOC-00451");
/// ```
pub fn extract_fields(text: &str) -> ExtractedFields {
    let mut fields = ExtractedFields::new();

    if let Some(caps) = doc_number_re().captures(text) {
        fields.insert(
            OWNERSHIP_DOCUMENT_NUMBER.to_string(),
            format!("DOC-{}", &caps[1]),
        );
    }

    if let Some(caps) = date_re().captures(text) {
        fields.insert(DOCUMENT_DATE.to_string(), caps[1].to_string());
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_document_number_variants() {
        for text in ["DOC-1234", "doc 1234", "Doc1234", "ref DOC - 1234 end"] {
            let fields = extract_fields(text);
            assert_eq!(
                fields.get(OWNERSHIP_DOCUMENT_NUMBER).map(String::as_str),
                Some("DOC-1234"),
                "input: {text}"
            );
        }
    }

    #[test]
    fn test_short_document_number_is_ignored() {
        assert!(extract_fields("DOC-12").is_empty());
    }

    #[test]
    fn test_extracts_date() {
        let fields = extract_fields("issued on 2023/7/15 by registry");
        assert_eq!(fields.get(DOCUMENT_DATE).map(String::as_str), Some("2023/7/15"));
    }

    #[test]
    fn test_first_match_wins() {
        let fields = extract_fields("DOC-111 DOC-222 2024-01-01 2025-02-02");
        assert_eq!(fields[OWNERSHIP_DOCUMENT_NUMBER], "DOC-111");
        assert_eq!(fields[DOCUMENT_DATE], "2024-01-01");
    }

    #[test]
    fn test_no_fields() {
        assert!(extract_fields("nothing of interest here").is_empty());
        assert!(extract_fields("").is_empty());
    }
}
