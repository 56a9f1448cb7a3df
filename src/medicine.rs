//! Over-the-counter medicines the advice may mention.

pub const SAFE_MEDICINES: &[&str] = &["Paracetamol", "ORS", "Zinc", "Antihistamine"];

/// Entries of [`SAFE_MEDICINES`] that appear in `text` as whole words,
/// singular or with a plural `s`.
///
/// Matching ignores case, so "ors" and "antihistamines" match but "doctors"
/// does not.
pub fn safe_medicines_mentioned(text: &str) -> Vec<String> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();

    SAFE_MEDICINES
        .iter()
        .filter(|m| {
            let needle = m.to_lowercase();
            words
                .iter()
                .any(|w| w.strip_suffix('s').unwrap_or(w) == needle || *w == needle)
        })
        .map(|m| m.to_string())
        .collect()
}
