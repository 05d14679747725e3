//! Metadata Resolver: turns a fingerprint outcome plus existing tags into
//! a ranked list of match candidates by fanning out to the oracle stack.
//!
//! **Grounded on:** `wkmp-ai/src/services/workflow_orchestrator/mod.rs`'s
//! phase-driving structure (sequential steps against shared collaborators)
//! and `musicbrainz_client.rs`'s retry/backoff posture, generalized here
//! into the explicit four-step algorithm and cache-first policy.

use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::db::cache::ResponseCache;
use crate::fingerprint::FingerprintOutcome;
use crate::oracles::{
    looks_like_known_mix_series, ArchiveOracle, ArchiveQuery, CoverArtOracle, FingerprintOracle,
    MetadataOracle, OracleError,
};
use crate::types::{MatchCandidate, Track};

const MAX_RETRIES: u32 = 3;
const POSITIVE_TTL_DAYS: i64 = 30;
const NEGATIVE_TTL_HOURS: i64 = 24;

pub struct MetadataResolver {
    fingerprint_oracle: Box<dyn FingerprintOracle>,
    metadata_oracle: Box<dyn MetadataOracle>,
    cover_art_oracle: Box<dyn CoverArtOracle>,
    archive_oracle: Box<dyn ArchiveOracle>,
    cache: ResponseCache,
}

impl MetadataResolver {
    pub fn new(
        fingerprint_oracle: Box<dyn FingerprintOracle>,
        metadata_oracle: Box<dyn MetadataOracle>,
        cover_art_oracle: Box<dyn CoverArtOracle>,
        archive_oracle: Box<dyn ArchiveOracle>,
        cache: ResponseCache,
    ) -> Self {
        Self {
            fingerprint_oracle,
            metadata_oracle,
            cover_art_oracle,
            archive_oracle,
            cache,
        }
    }

    /// Resolve candidates for one track per §4.3's four-step algorithm.
    pub async fn resolve(
        &self,
        track: &Track,
        fingerprint_outcome: &FingerprintOutcome,
    ) -> Vec<MatchCandidate> {
        let mut candidates = Vec::new();

        // Step 1: fingerprint oracle, if a fingerprint was extracted.
        if let FingerprintOutcome::Ok(fingerprint) = fingerprint_outcome {
            match self.lookup_fingerprint(&fingerprint.data, fingerprint.duration_seconds).await {
                Ok(found) => candidates.extend(found),
                Err(e) => tracing::warn!(error = %e, "fingerprint oracle lookup failed"),
            }
        }

        // Step 2: enrich release-bearing candidates with the metadata and
        // cover-art oracles.
        for candidate in &mut candidates {
            let Some(release_id) = candidate.release_id.clone() else {
                continue;
            };
            if let Ok(Some(enriched)) = self.enrich(&release_id).await {
                candidate.artist = enriched.artist.or_else(|| candidate.artist.take());
                candidate.album = enriched.album.or_else(|| candidate.album.take());
                candidate.year = enriched.year.or(candidate.year);
                candidate.title = enriched.title.or_else(|| candidate.title.take());
            }
            if let Ok(Some(handle)) = self.cover_art(&release_id).await {
                candidate.cover_art_handle = Some(handle);
            }
        }

        // Step 3: known-mix/compilation archive lookup, either primary
        // (heuristic match) or fallback (nothing else found yet).
        let is_known_mix = looks_like_known_mix_series(
            &track.existing_tags,
            &track.title_or_filename_stem(),
        );
        if is_known_mix || candidates.is_empty() {
            let query = ArchiveQuery {
                series_name: if is_known_mix {
                    track.existing_tags.album.clone().unwrap_or_default()
                } else {
                    String::new()
                },
                disc_number: track.existing_tags.disc_number,
                track_number: track.existing_tags.track_number,
                free_text_fallback: track.title_or_filename_stem(),
            };
            match self.archive_oracle.lookup(&query).await {
                Ok(found) if is_known_mix => {
                    // Known-mix matches are authoritative; prepend them.
                    let mut merged = found;
                    merged.extend(candidates);
                    candidates = merged;
                }
                Ok(found) => candidates.extend(found),
                Err(e) => tracing::warn!(error = %e, "archive oracle lookup failed"),
            }
        }

        // Step 4: synthesize a fallback candidate from tags/filename if
        // every oracle came back empty.
        if candidates.is_empty() {
            candidates.push(MatchCandidate::from_tags_fallback(
                &track.existing_tags,
                &track.title_or_filename_stem(),
            ));
        }

        candidates
    }

    async fn lookup_fingerprint(
        &self,
        fingerprint: &str,
        duration_seconds: f64,
    ) -> Result<Vec<MatchCandidate>, OracleError> {
        let cache_key = format!("fp:{fingerprint}");
        if let Some(entry) = self.cache.get(self.fingerprint_oracle.name(), &cache_key).await.ok().flatten() {
            if entry.is_negative {
                return Ok(Vec::new());
            }
            if let Some(json) = entry.response_json {
                if let Ok(candidates) = serde_json::from_str(&json) {
                    return Ok(candidates);
                }
            }
        }

        let result = self
            .with_retries(|| self.fingerprint_oracle.lookup(fingerprint, duration_seconds))
            .await;

        match &result {
            Ok(candidates) if candidates.is_empty() => {
                let _ = self.cache.put_negative(self.fingerprint_oracle.name(), &cache_key).await;
            }
            Ok(candidates) => {
                if let Ok(json) = serde_json::to_string(candidates) {
                    let _ = self.cache.put_positive(self.fingerprint_oracle.name(), &cache_key, &json).await;
                }
            }
            Err(OracleError::Api(status, _)) if (400..500).contains(status) && *status != 429 => {
                let _ = self.cache.put_negative(self.fingerprint_oracle.name(), &cache_key).await;
            }
            Err(_) => {}
        }

        result
    }

    async fn enrich(&self, release_id: &str) -> Result<Option<MatchCandidate>, OracleError> {
        let cache_key = format!("release:{}", release_id.to_lowercase());
        if let Some(entry) = self.cache.get(self.metadata_oracle.name(), &cache_key).await.ok().flatten() {
            if entry.is_negative {
                return Ok(None);
            }
            if let Some(json) = entry.response_json {
                if let Ok(candidate) = serde_json::from_str(&json) {
                    return Ok(Some(candidate));
                }
            }
        }

        let result = self
            .with_retries(|| self.metadata_oracle.enrich(release_id))
            .await;

        match &result {
            Ok(None) => {
                let _ = self.cache.put_negative(self.metadata_oracle.name(), &cache_key).await;
            }
            Ok(Some(candidate)) => {
                if let Ok(json) = serde_json::to_string(candidate) {
                    let _ = self.cache.put_positive(self.metadata_oracle.name(), &cache_key, &json).await;
                }
            }
            Err(_) => {}
        }

        result
    }

    async fn cover_art(&self, release_id: &str) -> Result<Option<String>, OracleError> {
        self.cover_art_oracle.cover_art_handle(release_id).await
    }

    /// Exponential backoff on transient failures (timeout/5xx) up to three
    /// attempts; a 429 forces a single extra pacing retry.
    async fn with_retries<F, Fut, T>(&self, mut attempt: F) -> Result<T, OracleError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, OracleError>>,
    {
        let mut backoff = Duration::from_millis(250);
        let mut last_err = None;

        for attempt_number in 0..MAX_RETRIES {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(OracleError::RateLimited) => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    last_err = Some(OracleError::RateLimited);
                    if attempt_number >= 1 {
                        break;
                    }
                }
                Err(OracleError::Network(e)) => {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    last_err = Some(OracleError::Network(e));
                }
                Err(OracleError::Api(status, body)) if (500..600).contains(&status) => {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    last_err = Some(OracleError::Api(status, body));
                }
                Err(other) => return Err(other),
            }
        }

        Err(last_err.unwrap_or(OracleError::BadResponse("retries exhausted".to_string())))
    }
}

pub fn positive_cache_ttl() -> ChronoDuration {
    ChronoDuration::days(POSITIVE_TTL_DAYS)
}

pub fn negative_cache_ttl() -> ChronoDuration {
    ChronoDuration::hours(NEGATIVE_TTL_HOURS)
}
