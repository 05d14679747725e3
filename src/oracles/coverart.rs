//! Cover Art Archive client.
//!
//! **Grounded on:** the same request/response/rate-limit shape as
//! `oracles::musicbrainz`, since the Cover Art Archive is a companion
//! MusicBrainz service with an analogous per-release lookup endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{CoverArtOracle, OracleError};
use crate::rate_limiter::RateLimiter;

const COVER_ART_BASE_URL: &str = "https://coverartarchive.org/release";
const SERVICE: &str = "coverartarchive";

#[derive(Debug, Deserialize)]
struct CoverArtResponse {
    images: Vec<CoverArtImage>,
}

#[derive(Debug, Deserialize)]
struct CoverArtImage {
    image: String,
    front: bool,
}

pub struct CoverArtArchiveOracle {
    client: reqwest::Client,
    rate_limiter: RateLimiter,
}

impl CoverArtArchiveOracle {
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
impl CoverArtOracle for CoverArtArchiveOracle {
    fn name(&self) -> &'static str {
        "coverartarchive"
    }

    async fn cover_art_handle(&self, release_id: &str) -> Result<Option<String>, OracleError> {
        let cancel = tokio_util::sync::CancellationToken::new();
        self.rate_limiter
            .acquire(SERVICE, &cancel)
            .await
            .map_err(|_| OracleError::Cancelled)?;

        let url = format!("{COVER_ART_BASE_URL}/{release_id}");
        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api(status.as_u16(), body));
        }

        let parsed: CoverArtResponse = response
            .json()
            .await
            .map_err(|e| OracleError::BadResponse(e.to_string()))?;

        Ok(parsed
            .images
            .into_iter()
            .find(|img| img.front)
            .map(|img| img.image))
    }
}
