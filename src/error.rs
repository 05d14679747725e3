//! Crate-wide error types.
//!
//! Each component defines its own leaf error enum; this module aggregates
//! them behind a single `Error`/`Result` pair so callers crossing component
//! boundaries don't have to match on half a dozen distinct error types.

use thiserror::Error;

use crate::fingerprint::FingerprintError;
use crate::oracles::OracleError;
use crate::organizer::OrganizerError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("organizer error: {0}")]
    Organizer(#[from] OrganizerError),

    #[error("internal error: {0}")]
    Internal(String),
}
