//! AcoustID fingerprint oracle client.
//!
//! **Grounded on:** `wkmp-ai/src/fusion/extractors/acoustid_client.rs`
//! (endpoint, response shape, API-key gating) and
//! `wkmp-ai/src/services/musicbrainz_client.rs` (status-code-to-error
//! mapping), rate-limited through the crate's own `RateLimiter` rather
//! than the teacher's `governor`, since this crate centralizes all
//! per-service pacing in one component (see `rate_limiter.rs`).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{FingerprintOracle, OracleError};
use crate::rate_limiter::RateLimiter;
use crate::types::{MatchCandidate, Provenance};

const ACOUSTID_BASE_URL: &str = "https://api.acoustid.org/v2/lookup";
const SERVICE: &str = "acoustid";
const MAX_RESULTS: usize = 5;

#[derive(Debug, Deserialize)]
struct AcoustIdResponse {
    status: String,
    results: Option<Vec<AcoustIdResult>>,
}

#[derive(Debug, Deserialize)]
struct AcoustIdResult {
    score: f64,
    recordings: Option<Vec<AcoustIdRecording>>,
}

#[derive(Debug, Deserialize)]
struct AcoustIdRecording {
    id: String,
    title: Option<String>,
    #[serde(default)]
    artists: Vec<AcoustIdArtist>,
}

#[derive(Debug, Deserialize)]
struct AcoustIdArtist {
    name: String,
}

pub struct AcoustIdOracle {
    api_key: String,
    client: reqwest::Client,
    rate_limiter: RateLimiter,
}

impl AcoustIdOracle {
    pub fn new(api_key: Option<String>, rate_limiter: RateLimiter) -> Self {
        Self {
            api_key: api_key.unwrap_or_default(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client config is static and always valid"),
            rate_limiter,
        }
    }
}

#[async_trait]
impl FingerprintOracle for AcoustIdOracle {
    fn name(&self) -> &'static str {
        "acoustid"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn lookup(
        &self,
        fingerprint: &str,
        duration_seconds: f64,
    ) -> Result<Vec<MatchCandidate>, OracleError> {
        if !self.is_configured() {
            return Ok(Vec::new());
        }

        let cancel = tokio_util::sync::CancellationToken::new();
        self.rate_limiter
            .acquire(SERVICE, &cancel)
            .await
            .map_err(|_| OracleError::Cancelled)?;

        let response = self
            .client
            .get(ACOUSTID_BASE_URL)
            .query(&[
                ("client", self.api_key.as_str()),
                ("meta", "recordings+releasegroups"),
                ("fingerprint", fingerprint),
                ("duration", &(duration_seconds.round() as i64).to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api(status.as_u16(), body));
        }

        let parsed: AcoustIdResponse = response
            .json()
            .await
            .map_err(|e| OracleError::BadResponse(e.to_string()))?;

        if parsed.status != "ok" {
            return Err(OracleError::BadResponse(parsed.status));
        }

        let mut candidates = Vec::new();
        for result in parsed.results.unwrap_or_default() {
            for recording in result.recordings.unwrap_or_default().into_iter().take(MAX_RESULTS) {
                candidates.push(MatchCandidate {
                    artist: recording.artists.first().map(|a| a.name.clone()),
                    title: recording.title.clone(),
                    album: None,
                    year: None,
                    track_number: None,
                    disc_number: None,
                    release_id: Some(recording.id),
                    cover_art_handle: None,
                    fingerprint_similarity: result.score.clamp(0.0, 1.0),
                    title_similarity: 0.0,
                    artist_similarity: 0.0,
                    candidate_duration_seconds: 0.0,
                    album_consistency: 0.0,
                    provenance: Provenance::Fingerprint,
                });
                if candidates.len() >= MAX_RESULTS {
                    break;
                }
            }
        }
        candidates.truncate(MAX_RESULTS);
        Ok(candidates)
    }
}
