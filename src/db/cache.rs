//! Response Cache: persists oracle responses (positive and negative) keyed
//! by service + lookup key, with a TTL-based eviction policy.
//!
//! **Grounded on:** `wkmp-common/src/db/init.rs`'s `INSERT OR IGNORE`
//! upsert style, generalized to an `INSERT ... ON CONFLICT DO UPDATE`
//! replace for cache entries (a fresh lookup should always win over a
//! stale one, not be ignored).

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::error::Result;

/// A cached oracle response. `response_json` is `None` for a negative
/// cache entry (the oracle was queried and returned nothing).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub response_json: Option<String>,
    pub is_negative: bool,
    pub expires_at: DateTime<Utc>,
}

pub struct ResponseCache {
    pool: SqlitePool,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl ResponseCache {
    /// `positive_ttl` and `negative_ttl` follow §4.3: negative results
    /// (no match found) are cached for a shorter period than positive
    /// ones, since an oracle's catalog can gain a recording over time.
    pub fn new(pool: SqlitePool, positive_ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            pool,
            positive_ttl,
            negative_ttl,
        }
    }

    pub async fn get(&self, service: &str, cache_key: &str) -> Result<Option<CacheEntry>> {
        let row: Option<(Option<String>, i64, String)> = sqlx::query_as(
            "SELECT response_json, is_negative, expires_at FROM response_cache
             WHERE service = ? AND cache_key = ?",
        )
        .bind(service)
        .bind(cache_key)
        .fetch_optional(&self.pool)
        .await?;

        let Some((response_json, is_negative, expires_at)) = row else {
            return Ok(None);
        };
        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| crate::error::Error::Internal(format!("bad cache timestamp: {e}")))?;

        if expires_at <= Utc::now() {
            return Ok(None);
        }

        Ok(Some(CacheEntry {
            response_json,
            is_negative: is_negative != 0,
            expires_at,
        }))
    }

    pub async fn put_positive(&self, service: &str, cache_key: &str, response_json: &str) -> Result<()> {
        self.put(service, cache_key, Some(response_json), false, self.positive_ttl)
            .await
    }

    pub async fn put_negative(&self, service: &str, cache_key: &str) -> Result<()> {
        self.put(service, cache_key, None, true, self.negative_ttl).await
    }

    async fn put(
        &self,
        service: &str,
        cache_key: &str,
        response_json: Option<&str>,
        is_negative: bool,
        ttl: Duration,
    ) -> Result<()> {
        let expires_at = (Utc::now() + ttl).to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO response_cache (service, cache_key, response_json, is_negative, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(service, cache_key) DO UPDATE SET
                response_json = excluded.response_json,
                is_negative = excluded.is_negative,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(service)
        .bind(cache_key)
        .bind(response_json)
        .bind(is_negative as i64)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete all expired entries. Intended to be run periodically by the
    /// embedder, not on every lookup (lookups already re-check `expires_at`
    /// and treat a stale row as absent).
    pub async fn evict_expired(&self) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query("DELETE FROM response_cache WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn cache() -> ResponseCache {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init_database(&dir.path().join("c.db")).await.unwrap();
        std::mem::forget(dir);
        ResponseCache::new(pool, Duration::days(30), Duration::hours(1))
    }

    #[tokio::test]
    async fn positive_hit_round_trips() {
        let cache = cache().await;
        cache.put_positive("acoustid", "fp:abc", "{\"matched\":true}").await.unwrap();
        let entry = cache.get("acoustid", "fp:abc").await.unwrap().unwrap();
        assert!(!entry.is_negative);
        assert_eq!(entry.response_json.as_deref(), Some("{\"matched\":true}"));
    }

    #[tokio::test]
    async fn negative_entry_has_no_payload() {
        let cache = cache().await;
        cache.put_negative("acoustid", "fp:missing").await.unwrap();
        let entry = cache.get("acoustid", "fp:missing").await.unwrap().unwrap();
        assert!(entry.is_negative);
        assert!(entry.response_json.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init_database(&dir.path().join("c.db")).await.unwrap();
        let cache = ResponseCache::new(pool, Duration::seconds(-1), Duration::hours(1));
        cache.put_positive("acoustid", "fp:stale", "{}").await.unwrap();
        assert!(cache.get("acoustid", "fp:stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn evict_expired_removes_stale_rows_only() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init_database(&dir.path().join("c.db")).await.unwrap();
        let stale = ResponseCache::new(pool.clone(), Duration::seconds(-1), Duration::hours(1));
        stale.put_positive("acoustid", "fp:stale", "{}").await.unwrap();
        let fresh = ResponseCache::new(pool.clone(), Duration::days(1), Duration::hours(1));
        fresh.put_positive("acoustid", "fp:fresh", "{}").await.unwrap();

        let evicted = fresh.evict_expired().await.unwrap();
        assert_eq!(evicted, 1);
        assert!(fresh.get("acoustid", "fp:fresh").await.unwrap().is_some());
    }
}
