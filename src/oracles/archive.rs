//! Archive-catalog oracle: structured lookups for known mixes/compilations
//! (§4.3 step 3), and a free-text fallback when the fingerprint and
//! metadata oracles return nothing.
//!
//! **Grounded on:** the request-shape conventions of
//! `oracles::musicbrainz`; no teacher file targets archive.org-style
//! catalogs directly, so this client generalizes the same
//! rate-limited-`reqwest`-plus-typed-response pattern to a search endpoint
//! with a metadata query instead of a direct-id lookup.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ArchiveOracle, ArchiveQuery, OracleError};
use crate::rate_limiter::RateLimiter;
use crate::types::{MatchCandidate, Provenance};

const ARCHIVE_SEARCH_URL: &str = "https://archive.org/advancedsearch.php";
const SERVICE: &str = "archive";

#[derive(Debug, Deserialize)]
struct ArchiveSearchResponse {
    response: ArchiveSearchBody,
}

#[derive(Debug, Deserialize)]
struct ArchiveSearchBody {
    docs: Vec<ArchiveDoc>,
}

#[derive(Debug, Deserialize)]
struct ArchiveDoc {
    identifier: String,
    title: Option<String>,
    creator: Option<String>,
}

pub struct ArchiveOrgOracle {
    client: reqwest::Client,
    rate_limiter: RateLimiter,
}

impl ArchiveOrgOracle {
    pub fn new(rate_limiter: RateLimiter) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client config is static and always valid"),
            rate_limiter,
        }
    }
}

#[async_trait]
impl ArchiveOracle for ArchiveOrgOracle {
    fn name(&self) -> &'static str {
        "archive.org"
    }

    async fn lookup(&self, query: &ArchiveQuery) -> Result<Vec<MatchCandidate>, OracleError> {
        let cancel = tokio_util::sync::CancellationToken::new();
        self.rate_limiter
            .acquire(SERVICE, &cancel)
            .await
            .map_err(|_| OracleError::Cancelled)?;

        let search_term = if query.series_name.is_empty() {
            query.free_text_fallback.clone()
        } else {
            format!("{} {}", query.series_name, query.free_text_fallback)
        };

        let response = self
            .client
            .get(ARCHIVE_SEARCH_URL)
            .query(&[
                ("q", search_term.as_str()),
                ("fl[]", "identifier"),
                ("fl[]", "title"),
                ("fl[]", "creator"),
                ("rows", "5"),
                ("output", "json"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api(status.as_u16(), body));
        }

        let parsed: ArchiveSearchResponse = response
            .json()
            .await
            .map_err(|e| OracleError::BadResponse(e.to_string()))?;

        Ok(parsed
            .response
            .docs
            .into_iter()
            .map(|doc| MatchCandidate {
                artist: doc.creator,
                title: doc.title,
                album: Some(query.series_name.clone()).filter(|s| !s.is_empty()),
                year: None,
                track_number: query.track_number,
                disc_number: query.disc_number,
                release_id: Some(doc.identifier),
                cover_art_handle: None,
                fingerprint_similarity: 0.0,
                title_similarity: 0.0,
                artist_similarity: 0.0,
                candidate_duration_seconds: 0.0,
                album_consistency: 0.0,
                provenance: Provenance::Archive,
            })
            .collect())
    }
}
