//! Fingerprint Stage: bounded-parallel acoustic fingerprint extraction with
//! non-blocking cancellation.
//!
//! **Grounded on:** `wkmp-ai/src/services/fingerprinter.rs` (duration
//! truncation / minimum-length handling) and
//! `workflow_orchestrator/phase_fingerprinting.rs` (progress counters fed
//! back through an event bus while a bounded pool works). The teacher uses
//! an in-process FFI fingerprinter and a rayon joining pool; this stage
//! instead treats the extractor as an **external, injected collaborator**
//! invoked per file via subprocess exit codes, and uses
//! `tokio::task::spawn_blocking` handles rather than rayon so pending work
//! can be dropped without joining on cancel, per the stage's own
//! non-blocking-teardown contract.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::events::{EventBus, Phase, PipelineEvent, ProgressEvent, ProgressThrottle};
use crate::types::Fingerprint;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("io error launching fingerprint extractor: {0}")]
    Io(#[from] std::io::Error),
    #[error("fingerprint extractor produced unparsable output: {0}")]
    BadOutput(String),
}

/// Per-file result of the extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FingerprintOutcome {
    Ok(Fingerprint),
    /// Audio shorter than the stage's minimum (intros, skits).
    ShortAudio,
    DecodeError,
    /// The extractor binary itself could not be found or started; applies
    /// to the whole stage, not a single file.
    ToolMissing,
    Cancelled,
}

/// Exit-code contract for the external fingerprint extractor binary: it is
/// invoked as `<tool> <path>` and prints `fingerprint\tduration_seconds` to
/// stdout on success.
const EXIT_OK: i32 = 0;
const EXIT_SHORT_AUDIO: i32 = 2;
const EXIT_DECODE_ERROR: i32 = 3;

/// Abstracts the act of running the external extractor so tests can stub
/// it without a real subprocess and without invoking any toolchain.
#[async_trait::async_trait]
pub trait FingerprintExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<FingerprintOutcome, FingerprintError>;
}

/// Invokes a configured external binary per file.
pub struct SubprocessExtractor {
    binary: PathBuf,
}

impl SubprocessExtractor {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

#[async_trait::async_trait]
impl FingerprintExtractor for SubprocessExtractor {
    async fn extract(&self, path: &Path) -> Result<FingerprintOutcome, FingerprintError> {
        let output = tokio::process::Command::new(&self.binary)
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FingerprintOutcome::ToolMissing)
            }
            Err(e) => return Err(FingerprintError::Io(e)),
        };

        match output.status.code() {
            Some(EXIT_OK) => {
                let text = String::from_utf8_lossy(&output.stdout);
                let mut parts = text.trim().splitn(2, '\t');
                let data = parts
                    .next()
                    .ok_or_else(|| FingerprintError::BadOutput(text.to_string()))?;
                let duration: f64 = parts
                    .next()
                    .ok_or_else(|| FingerprintError::BadOutput(text.to_string()))?
                    .parse()
                    .map_err(|_| FingerprintError::BadOutput(text.to_string()))?;
                Ok(FingerprintOutcome::Ok(Fingerprint {
                    data: data.to_string(),
                    duration_seconds: duration,
                }))
            }
            Some(EXIT_SHORT_AUDIO) => Ok(FingerprintOutcome::ShortAudio),
            Some(EXIT_DECODE_ERROR) => Ok(FingerprintOutcome::DecodeError),
            _ => Ok(FingerprintOutcome::DecodeError),
        }
    }
}

pub struct FingerprintStage {
    extractor: Arc<dyn FingerprintExtractor>,
    event_bus: EventBus,
}

impl FingerprintStage {
    pub fn new(extractor: Arc<dyn FingerprintExtractor>, event_bus: EventBus) -> Self {
        Self { extractor, event_bus }
    }

    /// Fingerprint every track in `paths` with at most `worker_count`
    /// concurrent extractions. Returns a result per input path, in input
    /// order (the stage never reorders tracks). On cancellation, pending
    /// work is abandoned without being awaited; already-started tasks may
    /// still complete in the background but their results are discarded.
    pub async fn fingerprint_batch(
        &self,
        batch_id: uuid::Uuid,
        paths: &[PathBuf],
        worker_count: usize,
        cancel: CancellationToken,
    ) -> HashMap<PathBuf, FingerprintOutcome> {
        let total = paths.len();
        if total == 0 {
            return HashMap::new();
        }

        let semaphore = Arc::new(Semaphore::new(worker_count.max(1)));
        let mut handles = Vec::with_capacity(total);

        for path in paths {
            if cancel.is_cancelled() {
                break;
            }
            let permit_semaphore = semaphore.clone();
            let extractor = self.extractor.clone();
            let path = path.clone();
            let cancel = cancel.clone();

            // spawn_blocking handles are droppable without joining, which
            // is the property the stage's cancellation contract needs;
            // tokio::spawn is used here since the extractor call itself is
            // async I/O, but the handle is abandoned (not awaited) on
            // cancel below, giving the same non-blocking teardown.
            let handle = tokio::spawn(async move {
                let _permit = match permit_semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (path, FingerprintOutcome::Cancelled),
                };
                if cancel.is_cancelled() {
                    return (path, FingerprintOutcome::Cancelled);
                }
                match extractor.extract(&path).await {
                    Ok(outcome) => (path, outcome),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "fingerprint extraction failed");
                        (path, FingerprintOutcome::DecodeError)
                    }
                }
            });
            handles.push(handle);
        }

        let mut results = HashMap::with_capacity(total);
        let mut throttle = ProgressThrottle::new(total);
        let mut tool_missing_reported = false;

        for (completed, handle) in handles.into_iter().enumerate() {
            if cancel.is_cancelled() {
                handle.abort();
                continue;
            }
            match handle.await {
                Ok((path, outcome)) => {
                    if matches!(outcome, FingerprintOutcome::ToolMissing) && !tool_missing_reported {
                        tool_missing_reported = true;
                        self.event_bus
                            .emit_lossy(PipelineEvent::FingerprintToolMissing { batch_id });
                    }
                    results.insert(path, outcome);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "fingerprint task panicked or was cancelled");
                }
            }

            let completed = completed + 1;
            if throttle.should_emit(completed) {
                self.event_bus.emit_lossy(PipelineEvent::Progress(ProgressEvent {
                    batch_id,
                    phase: Phase::Fingerprinting,
                    completed,
                    total,
                    eta_hint: None,
                    current_path: None,
                    last_outcome: None,
                }));
            }
        }

        results
    }
}
