//! Confidence Scorer: weighted multi-factor scoring and tier classification.
//!
//! **Grounded on:** `wkmp-ai/src/services/confidence_assessor.rs`'s
//! evidence-struct-plus-weighted-sum shape and threshold-based
//! `Decision` enum, generalized from three factors/two thresholds to the
//! five-factor, four-tier scheme this system specifies — the weights
//! below are this system's own (fingerprint 0.40 / title 0.20 / artist
//! 0.20 / duration 0.10 / album 0.10), not the teacher's literal 30/60/10
//! split.

use crate::fuzzy::similarity;
use crate::types::{BatchContext, MatchCandidate, Tier, Track};

const WEIGHT_FINGERPRINT: f64 = 0.40;
const WEIGHT_TITLE: f64 = 0.20;
const WEIGHT_ARTIST: f64 = 0.20;
const WEIGHT_DURATION: f64 = 0.10;
const WEIGHT_ALBUM: f64 = 0.10;

const DURATION_TOLERANCE_SECONDS: f64 = 10.0;
const ALBUM_CONSISTENCY_THRESHOLD: f64 = 0.80;

/// Bracketed qualifiers stripped during title normalization, e.g.
/// `[remastered]`, `(live)`.
fn strip_qualifiers(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut depth = 0i32;
    for ch in input.chars() {
        match ch {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = (depth - 1).max(0),
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Strips a leading track-number prefix like `07 - ` or `7.` before
/// similarity comparison.
fn strip_leading_track_number(input: &str) -> &str {
    let trimmed = input.trim_start();
    let digits_end = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(0);
    if digits_end == 0 {
        return trimmed;
    }
    trimmed[digits_end..].trim_start_matches(|c: char| c == '.' || c == '-' || c.is_whitespace())
}

pub struct ConfidenceScorer {
    pub auto_apply_threshold: u8,
    pub review_threshold: u8,
}

impl ConfidenceScorer {
    pub fn new(auto_apply_threshold: u8, review_threshold: u8) -> Self {
        Self {
            auto_apply_threshold,
            review_threshold,
        }
    }

    /// Score a candidate against a track in `0..=100`.
    pub fn score(&self, candidate: &MatchCandidate, track: &Track, batch_context: &BatchContext) -> u8 {
        let fingerprint_component = candidate.fingerprint_similarity.clamp(0.0, 1.0);

        let track_title = strip_leading_track_number(&strip_qualifiers(&track.title_or_filename_stem()));
        let candidate_title = candidate.title.as_deref().unwrap_or_default();
        let title_component = similarity(track_title, &strip_qualifiers(candidate_title));

        let track_artist = track.existing_tags.artist.clone().unwrap_or_default();
        let candidate_artist = candidate.artist.as_deref().unwrap_or_default();
        let artist_component = similarity(&track_artist, candidate_artist);

        let duration_component = match (track.duration_seconds, duration_hint(candidate)) {
            (Some(actual), Some(expected)) => {
                let delta = (actual - expected).abs();
                (1.0 - (delta / DURATION_TOLERANCE_SECONDS).min(1.0)).max(0.0)
            }
            _ => 0.0,
        };

        let album_component = album_consistency(candidate, batch_context);

        let weighted = fingerprint_component * WEIGHT_FINGERPRINT
            + title_component * WEIGHT_TITLE
            + artist_component * WEIGHT_ARTIST
            + duration_component * WEIGHT_DURATION
            + album_component * WEIGHT_ALBUM;

        (weighted * 100.0).round().clamp(0.0, 100.0) as u8
    }

    /// Classify a score into a tier. Ties at either threshold resolve to
    /// the lower tier (`>=` would give the boundary to the higher tier,
    /// so the comparisons below are deliberately `>=`/`>` in tier order,
    /// highest first, with no fallthrough ambiguity).
    pub fn classify(&self, score: u8) -> Tier {
        if score >= self.auto_apply_threshold {
            Tier::AutoApply
        } else if score >= self.review_threshold {
            Tier::Review
        } else if score > 0 {
            Tier::Manual
        } else {
            Tier::Unmatched
        }
    }
}

fn duration_hint(candidate: &MatchCandidate) -> Option<f64> {
    if candidate.candidate_duration_seconds != 0.0 {
        Some(candidate.candidate_duration_seconds)
    } else {
        None
    }
}

/// Fraction of other tracks in the batch whose top candidate shares this
/// release handle; similarity below `ALBUM_CONSISTENCY_THRESHOLD` doesn't
/// contribute (so a near-miss album name isn't silently counted).
fn album_consistency(candidate: &MatchCandidate, batch_context: &BatchContext) -> f64 {
    if batch_context.track_count <= 1 {
        return 1.0;
    }
    let Some(release_id) = &candidate.release_id else {
        return 0.0;
    };
    let matching = batch_context
        .top_candidate_release_counts
        .get(release_id)
        .copied()
        .unwrap_or(0);
    let fraction = matching as f64 / (batch_context.track_count - 1).max(1) as f64;
    if fraction >= ALBUM_CONSISTENCY_THRESHOLD {
        1.0
    } else {
        fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Provenance;
    use std::path::PathBuf;

    fn perfect_candidate() -> MatchCandidate {
        MatchCandidate {
            artist: Some("Boards of Canada".to_string()),
            title: Some("Roygbiv".to_string()),
            album: Some("Music Has the Right to Children".to_string()),
            year: Some(1998),
            track_number: Some(7),
            disc_number: None,
            release_id: Some("rel-1".to_string()),
            cover_art_handle: None,
            fingerprint_similarity: 1.0,
            title_similarity: 0.0,
            artist_similarity: 0.0,
            candidate_duration_seconds: 0.0,
            album_consistency: 0.0,
            provenance: Provenance::Fingerprint,
        }
    }

    fn matching_track() -> Track {
        let mut track = Track::new(uuid::Uuid::new_v4(), PathBuf::from("07 - Roygbiv.mp3"), 1000, "mp3".into());
        track.existing_tags.artist = Some("Boards of Canada".to_string());
        track.duration_seconds = Some(300.0);
        track
    }

    #[test]
    fn near_perfect_match_scores_very_high() {
        let scorer = ConfidenceScorer::new(90, 70);
        let mut candidate = perfect_candidate();
        candidate.candidate_duration_seconds = 300.0;
        let context = BatchContext::default();
        let score = scorer.score(&candidate, &matching_track(), &context);
        assert!(score >= 90, "expected auto-apply-worthy score, got {score}");
        assert_eq!(scorer.classify(score), Tier::AutoApply);
    }

    #[test]
    fn empty_candidate_scores_zero_and_is_unmatched() {
        let scorer = ConfidenceScorer::new(90, 70);
        let candidate = MatchCandidate::from_tags_fallback(&Default::default(), "");
        let mut track = Track::new(uuid::Uuid::new_v4(), PathBuf::from("track.mp3"), 10, "mp3".into());
        track.duration_seconds = None;
        let context = BatchContext::default();
        let score = scorer.score(&candidate, &track, &context);
        assert_eq!(score, 0);
        assert_eq!(scorer.classify(score), Tier::Unmatched);
    }

    #[test]
    fn threshold_ties_resolve_to_lower_tier() {
        let scorer = ConfidenceScorer::new(90, 70);
        assert_eq!(scorer.classify(90), Tier::AutoApply);
        assert_eq!(scorer.classify(89), Tier::Review);
        assert_eq!(scorer.classify(70), Tier::Review);
        assert_eq!(scorer.classify(69), Tier::Manual);
        assert_eq!(scorer.classify(1), Tier::Manual);
        assert_eq!(scorer.classify(0), Tier::Unmatched);
    }

    #[test]
    fn single_track_batch_gets_full_album_consistency_credit() {
        let scorer = ConfidenceScorer::new(90, 70);
        let mut candidate = perfect_candidate();
        candidate.candidate_duration_seconds = 300.0;
        let context = BatchContext {
            track_count: 1,
            top_candidate_release_counts: Default::default(),
        };
        let score = scorer.score(&candidate, &matching_track(), &context);
        assert!(score >= 90);
    }

    #[test]
    fn bracketed_qualifiers_are_ignored_in_title_comparison() {
        assert_eq!(strip_qualifiers("Roygbiv [Remastered]"), "Roygbiv ");
        assert_eq!(strip_qualifiers("Roygbiv (Live)"), "Roygbiv ");
    }

    #[test]
    fn leading_track_numbers_are_stripped() {
        assert_eq!(strip_leading_track_number("07 - Roygbiv"), "Roygbiv");
        assert_eq!(strip_leading_track_number("7. Roygbiv"), "Roygbiv");
        assert_eq!(strip_leading_track_number("Roygbiv"), "Roygbiv");
    }
}
