//! Text normalization shared by rule matching and trigger compilation.

use unicode_normalization::UnicodeNormalization;

/// Inputs longer than this are truncated before normalization.
pub const MAX_NORMALIZED_CHARS: usize = 1_000;

/// Normalizes text for trigger matching.
///
/// Applies NFKC, folds to lowercase, collapses whitespace runs to one space and
/// repeated punctuation marks to a single mark, then trims. Punctuation is kept
/// so punctuation-only triggers such as `?` stay matchable; NFKC already maps
/// full-width marks (`？`) onto their ASCII forms.
pub fn normalize_text(raw: &str) -> String {
    let capped = raw.chars().take(MAX_NORMALIZED_CHARS).collect::<String>();
    let folded = capped
        .nfkc()
        .flat_map(char::to_lowercase)
        .collect::<String>();

    let mut normalized = String::with_capacity(folded.len());
    let mut previous: Option<char> = None;
    for ch in folded.chars() {
        if ch.is_whitespace() || ch.is_control() {
            if previous.is_some() && previous != Some(' ') {
                normalized.push(' ');
                previous = Some(' ');
            }
            continue;
        }
        if is_punctuation(ch) && previous == Some(ch) {
            continue;
        }
        normalized.push(ch);
        previous = Some(ch);
    }
    if normalized.ends_with(' ') {
        normalized.pop();
    }
    normalized
}

fn is_punctuation(ch: char) -> bool {
    ch.is_ascii_punctuation() || (!ch.is_alphanumeric() && !ch.is_whitespace())
}
