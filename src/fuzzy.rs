//! Fuzzy string matching used when comparing candidate titles/artists
//! against existing tags or filenames.
//!
//! **Grounded on:** `wkmp-ai/src/services/confidence_assessor.rs` for the
//! evidence-score (0.0-1.0 range) convention, generalized from exact
//! duration-match booleans to continuous string similarity using `strsim`
//! as the teacher pack's general-purpose string similarity crate.

use deunicode::deunicode;
use strsim::jaro_winkler;

/// Normalizes a string for comparison: diacritic stripping, case folding,
/// and collapsing of punctuation/whitespace runs, per §4.4's normalization
/// rule ("The two fields being compared are `Normalize` before similarity
/// is computed").
pub fn normalize(input: &str) -> String {
    let ascii = deunicode(input);
    let mut out = String::with_capacity(ascii.len());
    let mut last_was_space = true; // trims leading whitespace for free
    for ch in ascii.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Similarity of two (possibly un-normalized) strings in `[0.0, 1.0]`.
/// Empty-vs-empty is defined as perfect similarity; empty-vs-nonempty is 0.
pub fn similarity(a: &str, b: &str) -> f64 {
    let (na, nb) = (normalize(a), normalize(b));
    if na.is_empty() && nb.is_empty() {
        return 1.0;
    }
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    jaro_winkler(&na, &nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_diacritics_and_case() {
        assert_eq!(normalize("Bjork's Homogenic!"), "bjork s homogenic");
        assert_eq!(normalize("Café del Mar"), "cafe del mar");
    }

    #[test]
    fn identical_strings_after_normalization_score_one() {
        assert_eq!(similarity("Hello World", "hello   world"), 1.0);
    }

    #[test]
    fn unrelated_strings_score_low() {
        assert!(similarity("Thunderstruck", "Yesterday") < 0.6);
    }

    #[test]
    fn both_empty_is_perfect_neither_empty_is_zero() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("", "something"), 0.0);
    }
}
