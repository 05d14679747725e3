//! Core data model: `Track`, `MatchCandidate`, `MatchResult`, and the
//! processing state machine.
//!
//! **Grounded on:** `wkmp-ai/src/models/import_result.rs` and
//! `wkmp-ai/src/db/files.rs` for the shape of a scanned-file record, and
//! `wkmp-ai/src/services/confidence_assessor.rs` for the candidate /
//! decision split.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Existing embedded tags, each field optional since the whole point of the
/// pipeline is to handle files missing some or all of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExistingTags {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub year: Option<u32>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
}

/// An opaque acoustic fingerprint plus the duration used to extract it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub data: String,
    pub duration_seconds: f64,
}

/// Track processing state machine.
///
/// `pending -> fingerprinted -> resolved -> classified ->
/// {applied | queued_for_review | unmatched | failed}`. The four tail
/// states are terminal and persisted; on restart, tracks in a terminal
/// state for the same batch id are skipped (resume, §4.1 phase 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Pending,
    Fingerprinted,
    Resolved,
    Classified,
    Applied,
    QueuedForReview,
    Unmatched,
    Failed,
}

impl ProcessingState {
    /// Terminal states are the ones skipped by the resume filter.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessingState::Applied
                | ProcessingState::QueuedForReview
                | ProcessingState::Unmatched
                | ProcessingState::Failed
        )
    }
}

/// Classification tier assigned by the Confidence Scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    AutoApply,
    Review,
    Manual,
    Unmatched,
}

/// Which oracle produced a candidate; used as the tie-break after score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Fingerprint,
    Archive,
    TagFallback,
}

/// A proposed identity for a track, with per-factor similarity scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub year: Option<u32>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    /// Opaque oracle handle (e.g. MusicBrainz release MBID).
    pub release_id: Option<String>,
    pub cover_art_handle: Option<String>,
    pub fingerprint_similarity: f64,
    pub title_similarity: f64,
    pub artist_similarity: f64,
    /// Duration in seconds as reported by the oracle, if any; `0.0` means
    /// unknown (the scorer treats this candidate's duration factor as
    /// uninformative rather than as a duration of zero).
    pub candidate_duration_seconds: f64,
    pub album_consistency: f64,
    pub provenance: Provenance,
}

impl MatchCandidate {
    /// A minimal candidate synthesized from existing tags / filename when
    /// every oracle returns nothing (§4.3 step 4).
    pub fn from_tags_fallback(tags: &ExistingTags, filename_stem: &str) -> Self {
        Self {
            artist: tags.artist.clone(),
            title: tags
                .title
                .clone()
                .or_else(|| Some(filename_stem.to_string())),
            album: tags.album.clone(),
            year: tags.year,
            track_number: tags.track_number,
            disc_number: tags.disc_number,
            release_id: None,
            cover_art_handle: None,
            fingerprint_similarity: 0.0,
            title_similarity: 0.0,
            artist_similarity: 0.0,
            candidate_duration_seconds: 0.0,
            album_consistency: 0.0,
            provenance: Provenance::TagFallback,
        }
    }
}

/// A Track's resolved candidates plus the scorer's verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchResult {
    /// Descending by aggregate score; ties broken by provenance priority
    /// then title similarity (see `sort_candidates`).
    pub candidates: Vec<(MatchCandidate, u8)>,
    pub chosen_index: Option<usize>,
    pub classification: Option<Tier>,
}

/// Sort candidates per the invariant in §3: descending aggregate score,
/// ties broken by provenance priority then title similarity.
pub fn sort_candidates(candidates: &mut [(MatchCandidate, u8)]) {
    candidates.sort_by(|(ca, sa), (cb, sb)| {
        sb.cmp(sa)
            .then_with(|| ca.provenance.cmp(&cb.provenance))
            .then(
                cb.title_similarity
                    .partial_cmp(&ca.title_similarity)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
}

/// A scanned audio file moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub batch_id: Uuid,
    pub source_path: PathBuf,
    pub size_bytes: u64,
    pub container_format: String,
    pub duration_seconds: Option<f64>,
    pub existing_tags: ExistingTags,
    pub fingerprint: Option<Fingerprint>,
    pub state: ProcessingState,
    pub last_error: Option<String>,
    pub match_result: Option<MatchResult>,
    pub destination_path: Option<PathBuf>,
}

impl Track {
    pub fn new(batch_id: Uuid, source_path: PathBuf, size_bytes: u64, container_format: String) -> Self {
        Self {
            batch_id,
            source_path,
            size_bytes,
            container_format,
            duration_seconds: None,
            existing_tags: ExistingTags::default(),
            fingerprint: None,
            state: ProcessingState::Pending,
            last_error: None,
            match_result: None,
            destination_path: None,
        }
    }

    /// The title used for similarity scoring when no tag is present: the
    /// filename stem, per §4.4's normalization rule.
    pub fn title_or_filename_stem(&self) -> String {
        self.existing_tags.title.clone().unwrap_or_else(|| {
            self.source_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default()
        })
    }
}

/// Cross-track context the scorer needs for the album-consistency factor:
/// for each release handle, how many other tracks in the batch chose it as
/// their top candidate.
#[derive(Debug, Clone, Default)]
pub struct BatchContext {
    pub track_count: usize,
    pub top_candidate_release_counts: std::collections::HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_classified_correctly() {
        assert!(ProcessingState::Applied.is_terminal());
        assert!(ProcessingState::Failed.is_terminal());
        assert!(!ProcessingState::Pending.is_terminal());
        assert!(!ProcessingState::Fingerprinted.is_terminal());
    }

    #[test]
    fn candidates_sort_by_score_then_provenance_then_title_similarity() {
        let high = MatchCandidate {
            title_similarity: 0.5,
            provenance: Provenance::Archive,
            ..MatchCandidate::from_tags_fallback(&ExistingTags::default(), "x")
        };
        let low = MatchCandidate {
            title_similarity: 0.9,
            provenance: Provenance::Fingerprint,
            ..MatchCandidate::from_tags_fallback(&ExistingTags::default(), "x")
        };
        let mut candidates = vec![(high.clone(), 80), (low.clone(), 90)];
        sort_candidates(&mut candidates);
        assert_eq!(candidates[0].1, 90);

        // Tie on score: lower provenance value (Fingerprint) wins.
        let mut tied = vec![(high.clone(), 80), (low.clone(), 80)];
        sort_candidates(&mut tied);
        assert_eq!(tied[0].0.provenance, Provenance::Fingerprint);
    }
}
