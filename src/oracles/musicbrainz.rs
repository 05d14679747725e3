//! MusicBrainz metadata and release-enrichment oracle client.
//!
//! **Grounded on:** `wkmp-ai/src/services/musicbrainz_client.rs` almost
//! directly: same base URL, user agent convention, and status-code
//! mapping (404 -> not found, 503 -> rate limited), with the teacher's
//! bespoke single-interval `RateLimiter` replaced by the crate-wide
//! `rate_limiter::RateLimiter` so MusicBrainz's 1 req/sec rule shares the
//! same pacing machinery as the other oracles.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{MetadataOracle, OracleError};
use crate::rate_limiter::RateLimiter;
use crate::types::{MatchCandidate, Provenance};

const MUSICBRAINZ_BASE_URL: &str = "https://musicbrainz.org/ws/2";
const USER_AGENT: &str = "audio-librarian/0.1 (+https://example.invalid)";
const SERVICE: &str = "musicbrainz";

#[derive(Debug, Deserialize)]
struct MBRecording {
    title: String,
    #[serde(rename = "artist-credit", default)]
    artist_credit: Vec<MBArtistCredit>,
    #[serde(default)]
    releases: Vec<MBRelease>,
}

#[derive(Debug, Deserialize)]
struct MBArtistCredit {
    name: String,
}

#[derive(Debug, Deserialize)]
struct MBRelease {
    title: String,
    date: Option<String>,
}

pub struct MusicBrainzOracle {
    client: reqwest::Client,
    rate_limiter: RateLimiter,
}

impl MusicBrainzOracle {
    pub fn new(rate_limiter: RateLimiter) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client config is static and always valid"),
            rate_limiter,
        }
    }
}

#[async_trait]
impl MetadataOracle for MusicBrainzOracle {
    fn name(&self) -> &'static str {
        "musicbrainz"
    }

    async fn enrich(&self, release_id: &str) -> Result<Option<MatchCandidate>, OracleError> {
        let cancel = tokio_util::sync::CancellationToken::new();
        self.rate_limiter
            .acquire(SERVICE, &cancel)
            .await
            .map_err(|_| OracleError::Cancelled)?;

        let url = format!(
            "{MUSICBRAINZ_BASE_URL}/recording/{release_id}?inc=artist-credits+releases&fmt=json"
        );
        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(OracleError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api(status.as_u16(), body));
        }

        let recording: MBRecording = response
            .json()
            .await
            .map_err(|e| OracleError::BadResponse(e.to_string()))?;

        let release = recording.releases.first();
        Ok(Some(MatchCandidate {
            artist: recording.artist_credit.first().map(|a| a.name.clone()),
            title: Some(recording.title),
            album: release.map(|r| r.title.clone()),
            year: release
                .and_then(|r| r.date.as_ref())
                .and_then(|d| d.get(0..4))
                .and_then(|y| y.parse().ok()),
            track_number: None,
            disc_number: None,
            release_id: Some(release_id.to_string()),
            cover_art_handle: None,
            fingerprint_similarity: 0.0,
            title_similarity: 0.0,
            artist_similarity: 0.0,
            candidate_duration_seconds: 0.0,
            album_consistency: 0.0,
            provenance: Provenance::Fingerprint,
        }))
    }
}
