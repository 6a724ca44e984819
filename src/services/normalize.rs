//! Channel identifier canonicalization
//!
//! Two separate normalizers are used on purpose:
//! - `normalize_loose` for catalog identity, genre and free-text matching.
//!   Every separator is dropped, so `Sky.Sport.1`, `SkySport1` and `sky sport 1`
//!   all collapse to `skysport1`.
//! - `normalize_dotted` for joining playlist channels to EPG channel keys.
//!   Dots are kept because schedule providers use them as separators
//!   (`Rai1.it`, `rai.1.hd`).

/// Lowercase and keep only ASCII letters, digits and `_`.
pub fn normalize_loose(id: &str) -> String {
    id.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Loose normalization with a configured suffix removed from the end.
///
/// The suffix is itself loosely normalized first, so `".it"` strips `it`.
pub fn normalize_loose_without_suffix(id: &str, suffix: Option<&str>) -> String {
    let normalized = normalize_loose(id);

    let Some(suffix) = suffix.map(normalize_loose).filter(|s| !s.is_empty()) else {
        return normalized;
    };

    match normalized.strip_suffix(suffix.as_str()) {
        Some(stripped) => stripped.to_string(),
        None => normalized,
    }
}

/// Lowercase and keep only ASCII letters, digits, `_` and `.`.
pub fn normalize_dotted(id: &str) -> String {
    id.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .collect::<String>()
        .trim()
        .to_string()
}
