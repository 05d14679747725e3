//! Progress event bus.
//!
//! **Grounded on:** `wkmp-common/src/events/mod.rs` (`EventBus`, backed by
//! `tokio::sync::broadcast`). The embedding process (UI, CLI, HTTP/SSE
//! server) subscribes to this bus; this crate never renders progress itself.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Which phase of a batch a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Scanning,
    Fingerprinting,
    Resolving,
}

/// Outcome of the most recently processed item, attached to progress events
/// so a UI can show a running tally without polling separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastOutcome {
    AutoApplied,
    QueuedForReview,
    Unmatched,
    Failed,
}

/// A single progress update. Subject to the throttle contract in §4.1: at
/// most one event per 1% of `total` or one per 250ms, whichever fires first,
/// with the final event (`completed == total`) always emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub batch_id: Uuid,
    pub phase: Phase,
    pub completed: usize,
    pub total: usize,
    pub eta_hint: Option<Duration>,
    pub current_path: Option<String>,
    pub last_outcome: Option<LastOutcome>,
}

/// Bus-wide event envelope. Progress updates are the only event kind this
/// crate emits; the enum leaves room for an embedder-defined extension
/// without widening this crate's public surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    Progress(ProgressEvent),
    /// Fingerprint tool is unavailable; all tracks degrade to tag-based
    /// resolution for the remainder of the batch. Emitted once per batch.
    FingerprintToolMissing { batch_id: Uuid },
}

/// Broadcasts pipeline events to any number of subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the case where nobody is listening.
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Throttles progress emission to the §4.1 contract: one event per 1% of
/// `total`, or one per 250ms, whichever comes first; the final event is
/// always forced through regardless of the throttle state.
pub struct ProgressThrottle {
    total: usize,
    last_emitted_count: usize,
    last_emitted_at: Instant,
    step: usize,
}

impl ProgressThrottle {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            last_emitted_count: 0,
            last_emitted_at: Instant::now(),
            step: (total / 100).max(1),
        }
    }

    /// Returns `true` if an event should be emitted for `completed` now.
    /// Always returns `true` once `completed >= total` (final event).
    pub fn should_emit(&mut self, completed: usize) -> bool {
        let is_final = completed >= self.total;
        let count_elapsed = completed.saturating_sub(self.last_emitted_count) >= self.step;
        let time_elapsed = self.last_emitted_at.elapsed() >= Duration::from_millis(250);

        if is_final || count_elapsed || time_elapsed {
            self.last_emitted_count = completed;
            self.last_emitted_at = Instant::now();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_event_always_emits() {
        let mut throttle = ProgressThrottle::new(1000);
        assert!(!throttle.should_emit(1));
        assert!(throttle.should_emit(1000));
    }

    #[test]
    fn emits_on_one_percent_steps() {
        let mut throttle = ProgressThrottle::new(1000);
        assert!(!throttle.should_emit(5));
        assert!(throttle.should_emit(10));
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.emit_lossy(PipelineEvent::Progress(ProgressEvent {
            batch_id: Uuid::new_v4(),
            phase: Phase::Scanning,
            completed: 1,
            total: 10,
            eta_hint: None,
            current_path: None,
            last_outcome: None,
        }));
        let event = rx.recv().await.unwrap();
        matches!(event, PipelineEvent::Progress(_));
    }
}
