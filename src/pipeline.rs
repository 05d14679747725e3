//! Pipeline Orchestrator: drives a batch through scan -> fingerprint ->
//! resolve -> score -> organize, honoring pause/cancel at every suspension
//! point and emitting throttled progress events.
//!
//! **Grounded on:** `wkmp-ai/src/services/workflow_orchestrator/mod.rs`'s
//! dependency-injected `WorkflowOrchestrator` (constructed with a db pool,
//! an event bus, and its component collaborators, rather than reaching for
//! globals) and its `phase_*` method-per-state structure, generalized from
//! a seven-state import workflow to this system's three phases
//! (scan/fingerprint/resolve-score-organize).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::db::tracks::TrackStore;
use crate::events::{EventBus, LastOutcome, Phase, PipelineEvent, ProgressEvent, ProgressThrottle};
use crate::fingerprint::{FingerprintOutcome, FingerprintStage};
use crate::organizer::SafeOrganizer;
use crate::resolver::MetadataResolver;
use crate::scanner::FileScanner;
use crate::scorer::ConfidenceScorer;
use crate::types::{BatchContext, ProcessingState, Tier, Track};

/// Summary returned once a batch finishes (or is cancelled mid-flight).
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub auto_applied: usize,
    pub queued_for_review: usize,
    pub unmatched: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Coordinates one batch run. Holds shared, cloneable collaborators and
/// constructs the heavier per-run components (resolver, organizer) from
/// injected pieces so tests can substitute fakes for every oracle.
pub struct PipelineOrchestrator {
    track_store: Arc<TrackStore>,
    scanner: FileScanner,
    fingerprint_stage: Arc<FingerprintStage>,
    resolver: Arc<MetadataResolver>,
    organizer: Arc<SafeOrganizer>,
    event_bus: EventBus,
    config: PipelineConfig,
    cancel: CancellationToken,
    paused: Arc<tokio::sync::Notify>,
    pause_flag: Arc<std::sync::atomic::AtomicBool>,
}

impl PipelineOrchestrator {
    pub fn new(
        track_store: Arc<TrackStore>,
        fingerprint_stage: Arc<FingerprintStage>,
        resolver: Arc<MetadataResolver>,
        organizer: Arc<SafeOrganizer>,
        event_bus: EventBus,
        config: PipelineConfig,
    ) -> Self {
        Self {
            track_store,
            scanner: FileScanner::new(),
            fingerprint_stage,
            resolver,
            organizer,
            event_bus,
            config,
            cancel: CancellationToken::new(),
            paused: Arc::new(tokio::sync::Notify::new()),
            pause_flag: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.event_bus.subscribe()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        // A cancelled pipeline must also be unparked if currently paused,
        // otherwise it would wait forever at the next suspension point.
        self.paused.notify_waiters();
    }

    pub fn pause(&self) {
        self.pause_flag.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.pause_flag.store(false, std::sync::atomic::Ordering::SeqCst);
        self.paused.notify_waiters();
    }

    /// Suspension point: honors both pause (blocks until resumed or
    /// cancelled) and cancel (returns immediately, caller checks
    /// `cancel.is_cancelled()` next).
    async fn suspension_point(&self) {
        while self.pause_flag.load(std::sync::atomic::Ordering::SeqCst) && !self.cancel.is_cancelled() {
            self.paused.notified().await;
        }
    }

    /// Run (or resume) a batch rooted at `library_scan_root`. Tracks
    /// already in a terminal state for `batch_id` are skipped, which is
    /// what makes a re-invocation with the same `batch_id` a resume rather
    /// than a restart.
    pub async fn run_batch(&self, batch_id: Uuid, library_scan_root: &std::path::Path) -> BatchReport {
        let mut report = BatchReport::default();

        // Phase 1: scan + resume filter.
        self.suspension_point().await;
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return report;
        }

        let discovered = match self.scanner.scan(library_scan_root) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::error!(error = %e, "scan failed, aborting batch");
                return report;
            }
        };

        let already_resolved = match self.track_store.all_for_batch(batch_id).await {
            Ok(tracks) => tracks
                .into_iter()
                .filter(|t| t.state.is_terminal())
                .map(|t| t.source_path)
                .collect::<std::collections::HashSet<_>>(),
            Err(_) => Default::default(),
        };
        let pending_paths: Vec<PathBuf> = discovered
            .into_iter()
            .filter(|p| !already_resolved.contains(p))
            .collect();

        if pending_paths.is_empty() {
            return report;
        }

        // Phase 2: parallel, cancellable fingerprinting.
        let fingerprints = self
            .fingerprint_stage
            .fingerprint_batch(batch_id, &pending_paths, self.config.worker_count, self.cancel.clone())
            .await;

        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return report;
        }

        // Phase 3: cooperative-sequential resolve, score, organize.
        let mut tracks: Vec<Track> = pending_paths
            .iter()
            .map(|path| self.new_track(batch_id, path))
            .collect();

        let mut scored: Vec<(usize, Tier, crate::types::MatchCandidate)> = Vec::new();
        let track_count = tracks.len();
        let throttle_total = track_count;
        let mut throttle = ProgressThrottle::new(throttle_total);
        let scorer = ConfidenceScorer::new(self.config.auto_apply_threshold, self.config.review_threshold);

        // Pass 1: resolve every track and pick a provisional top candidate
        // (scored against an empty batch context) to learn which release
        // each track would land on. Pass 2 then scores album consistency
        // against the whole batch's provisional picks instead of only the
        // tracks processed earlier in iteration order.
        let mut resolved_candidates: Vec<Option<Vec<crate::types::MatchCandidate>>> =
            (0..track_count).map(|_| None).collect();
        let mut provisional_release_ids: Vec<Option<String>> = vec![None; track_count];
        let mut provisional_release_counts: HashMap<String, usize> = HashMap::new();

        for (index, track) in tracks.iter_mut().enumerate() {
            self.suspension_point().await;
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let outcome = fingerprints
                .get(&track.source_path)
                .cloned()
                .unwrap_or(FingerprintOutcome::Cancelled);
            if let FingerprintOutcome::Ok(fp) = &outcome {
                track.fingerprint = Some(fp.clone());
                track.duration_seconds = Some(fp.duration_seconds);
            }
            track.state = ProcessingState::Fingerprinted;

            let candidates = self.resolver.resolve(track, &outcome).await;
            track.state = ProcessingState::Resolved;

            let empty_context = BatchContext {
                track_count,
                top_candidate_release_counts: HashMap::new(),
            };
            let mut provisional: Vec<(crate::types::MatchCandidate, u8)> = candidates
                .iter()
                .cloned()
                .map(|c| {
                    let s = scorer.score(&c, track, &empty_context);
                    (c, s)
                })
                .collect();
            crate::types::sort_candidates(&mut provisional);
            if let Some((candidate, _)) = provisional.first() {
                if let Some(release_id) = &candidate.release_id {
                    provisional_release_ids[index] = Some(release_id.clone());
                    *provisional_release_counts.entry(release_id.clone()).or_insert(0) += 1;
                }
            }

            resolved_candidates[index] = Some(candidates);
        }

        // Pass 2: rescore each track's candidates against the full batch's
        // provisional release counts, excluding the track's own vote, then
        // classify and emit progress from the final top candidate.
        for (index, track) in tracks.iter_mut().enumerate() {
            let Some(candidates) = resolved_candidates[index].take() else {
                break;
            };

            self.suspension_point().await;
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let mut other_release_counts = provisional_release_counts.clone();
            if let Some(own_release_id) = &provisional_release_ids[index] {
                if let Some(count) = other_release_counts.get_mut(own_release_id) {
                    *count = count.saturating_sub(1);
                }
            }
            let batch_context = BatchContext {
                track_count,
                top_candidate_release_counts: other_release_counts,
            };

            let mut scored_candidates: Vec<(crate::types::MatchCandidate, u8)> = candidates
                .into_iter()
                .map(|c| {
                    let s = scorer.score(&c, track, &batch_context);
                    (c, s)
                })
                .collect();
            crate::types::sort_candidates(&mut scored_candidates);

            let best = scored_candidates.into_iter().next();
            let score = best.as_ref().map(|(_, s)| *s).unwrap_or(0);
            let tier = scorer.classify(score);
            track.state = ProcessingState::Classified;

            if let Some((candidate, _)) = best {
                scored.push((index, tier, candidate));
            }

            let last_outcome = match tier {
                Tier::AutoApply => Some(LastOutcome::AutoApplied),
                Tier::Review => Some(LastOutcome::QueuedForReview),
                Tier::Manual => Some(LastOutcome::QueuedForReview),
                Tier::Unmatched => Some(LastOutcome::Unmatched),
            };

            let completed = index + 1;
            if throttle.should_emit(completed) {
                self.event_bus.emit_lossy(PipelineEvent::Progress(ProgressEvent {
                    batch_id,
                    phase: Phase::Resolving,
                    completed,
                    total: throttle_total,
                    eta_hint: None,
                    current_path: Some(track.source_path.to_string_lossy().to_string()),
                    last_outcome,
                }));
            }
        }

        for (index, tier, candidate) in scored {
            let track = &mut tracks[index];
            match tier {
                Tier::AutoApply => {
                    self.suspension_point().await;
                    if self.cancel.is_cancelled() {
                        report.cancelled = true;
                        break;
                    }
                    match self.organizer.apply(track, &candidate, &self.config).await {
                        Ok(result) => {
                            track.destination_path = Some(result.destination_path);
                            track.state = ProcessingState::Applied;
                            report.auto_applied += 1;
                        }
                        Err(e) => {
                            track.last_error = Some(e.to_string());
                            track.state = ProcessingState::Failed;
                            report.failed += 1;
                        }
                    }
                }
                Tier::Review | Tier::Manual => {
                    track.state = ProcessingState::QueuedForReview;
                    report.queued_for_review += 1;
                }
                Tier::Unmatched => {
                    track.state = ProcessingState::Unmatched;
                    report.unmatched += 1;
                }
            }
            let _ = self.track_store.upsert(Uuid::new_v4(), track).await;
        }

        report
    }

    fn new_track(&self, batch_id: Uuid, path: &std::path::Path) -> Track {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        Track::new(batch_id, path.to_path_buf(), size, ext)
    }
}
