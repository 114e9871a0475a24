use strsim::normalized_levenshtein;
use unicode_normalization::UnicodeNormalization;

/// Score reserved for identical text.
pub const EXACT_MATCH: u8 = 100;

/// Fuzzy similarity between OCR text and ground truth on a 0..=100 scale.
///
/// Only identical text (after NFC normalization) scores 100.
pub fn match_score(ocr: &str, ground_truth: &str) -> u8 {
    let ocr: String = ocr.nfc().collect();
    let ground_truth: String = ground_truth.nfc().collect();
    if ocr == ground_truth {
        return EXACT_MATCH;
    }
    if ocr.is_empty() || ground_truth.is_empty() {
        return 0;
    }

    let score = (normalized_levenshtein(&ocr, &ground_truth) * 100.0).round() as u8;
    score.min(EXACT_MATCH - 1)
}

/// Whitespace tokenization shared by alignment and line text handling.
pub fn tokenize(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}
