//! Audio library ingest pipeline: scans a directory tree for audio files,
//! identifies each one against fingerprint/metadata/archive oracles, scores
//! the candidates, and safely relocates + retags the files it's confident
//! about. Embedders (CLI, service, UI) drive a [`pipeline::PipelineOrchestrator`]
//! and subscribe to its [`events::EventBus`] for progress.
//!
//! **Grounded on:** `wkmp-ai`'s crate layout (`services/`, `fusion/extractors/`,
//! `db/`), reshaped around this crate's own module boundaries: `scanner`,
//! `fingerprint`, `oracles`, `resolver`, `scorer`, `organizer`, `pipeline`.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod fuzzy;
pub mod oracles;
pub mod organizer;
pub mod pipeline;
pub mod rate_limiter;
pub mod resolver;
pub mod scanner;
pub mod scorer;
pub mod types;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use events::{EventBus, PipelineEvent};
pub use pipeline::{BatchReport, PipelineOrchestrator};
pub use types::{MatchCandidate, ProcessingState, Tier, Track};
