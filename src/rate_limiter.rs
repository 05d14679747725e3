//! Per-service rate limiting for outbound oracle requests.
//!
//! **Grounded on:** `wkmp-ai/src/services/musicbrainz_client.rs`'s internal
//! `RateLimiter` (single min-interval gate behind a `tokio::sync::Mutex`),
//! generalized here to track one interval per named service so a single
//! `RateLimiter` instance can gate AcoustID, MusicBrainz, Cover Art Archive,
//! and Internet Archive calls independently, and made cancellation-aware
//! per §5's suspension-point contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Returned when a rate-limited wait was cut short by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

struct ServiceState {
    min_interval: Duration,
    last_request: Option<Instant>,
}

/// Enforces a minimum interval between requests to each named external
/// service. Cheap to clone; internal state is behind an `Arc<Mutex<_>>`.
#[derive(Clone)]
pub struct RateLimiter {
    services: Arc<Mutex<HashMap<&'static str, ServiceState>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            services: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register (or overwrite) the minimum interval for a service. Call
    /// once at startup per oracle; unregistered services are not
    /// rate-limited at all, which would be a configuration bug, not a
    /// silent default, so callers must opt every service in explicitly.
    pub async fn configure(&self, service: &'static str, min_interval: Duration) {
        let mut services = self.services.lock().await;
        services.insert(
            service,
            ServiceState {
                min_interval,
                last_request: None,
            },
        );
    }

    /// Block until it is safe to issue the next request to `service`,
    /// racing the wait against `cancel`. Returns `Err(Cancelled)` if
    /// cancellation fires first; in that case no request slot is consumed
    /// and the next call to `acquire` will wait the same interval again.
    pub async fn acquire(
        &self,
        service: &'static str,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<(), Cancelled> {
        let wait = {
            let mut services = self.services.lock().await;
            let state = services
                .entry(service)
                .or_insert_with(|| ServiceState {
                    min_interval: Duration::ZERO,
                    last_request: None,
                });
            let now = Instant::now();
            let wait = match state.last_request {
                Some(last) => state.min_interval.saturating_sub(now.duration_since(last)),
                None => Duration::ZERO,
            };
            state.last_request = Some(now + wait);
            wait
        };

        if wait.is_zero() {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = cancel.cancelled() => Err(Cancelled),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_waits_the_configured_interval() {
        let limiter = RateLimiter::new();
        limiter.configure("test", Duration::from_millis(50)).await;
        let cancel = tokio_util::sync::CancellationToken::new();

        limiter.acquire("test", &cancel).await.unwrap();
        let start = Instant::now();
        limiter.acquire("test", &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let limiter = RateLimiter::new();
        limiter.configure("test", Duration::from_secs(5)).await;
        let cancel = tokio_util::sync::CancellationToken::new();

        limiter.acquire("test", &cancel).await.unwrap();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel2.cancel();
        });
        let result = limiter.acquire("test", &cancel).await;
        assert_eq!(result, Err(Cancelled));
    }

    #[tokio::test]
    async fn unconfigured_service_never_waits() {
        let limiter = RateLimiter::new();
        let cancel = tokio_util::sync::CancellationToken::new();
        limiter.acquire("unknown", &cancel).await.unwrap();
        limiter.acquire("unknown", &cancel).await.unwrap();
    }
}
