//! Pipeline configuration.
//!
//! **Grounded on:** `wkmp-ai/src/config.rs` (tiered ENV/TOML resolution for
//! credentials) and `wkmp-common/src/config.rs` (typed config record, TOML
//! load with unknown-key rejection).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Batch-processing options.
///
/// Mirrors `options` in the orchestrator contract: every field is
/// enumerated and validated at load, no free-form extension points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    pub dry_run: bool,
    pub auto_apply_threshold: u8,
    pub review_threshold: u8,
    pub worker_count: usize,
    pub keep_originals: bool,
    pub library_root: PathBuf,
    pub backup_root: PathBuf,
    pub folder_template: String,
    pub file_template: String,
    pub skip_short_duration_seconds: f64,

    /// AcoustID API key. Resolved ENV -> TOML; never required at parse time
    /// so a config file can be loaded before credentials exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acoustid_api_key: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            auto_apply_threshold: 90,
            review_threshold: 70,
            worker_count: default_worker_count(),
            keep_originals: true,
            library_root: PathBuf::from("library"),
            backup_root: PathBuf::from("library/.backups"),
            folder_template: "{artist}/{album} ({year})".to_string(),
            file_template: "{track:02} - {title}".to_string(),
            skip_short_duration_seconds: 10.0,
            acoustid_api_key: None,
        }
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(2)
}

impl PipelineConfig {
    /// Load from a TOML file, then layer the AcoustID API key from the
    /// environment over whatever the file carries (ENV wins over TOML,
    /// following the teacher's credential-resolution priority).
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        let mut config: PipelineConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?;

        if let Ok(key) = std::env::var("WKMP_AI_ACOUSTID_API_KEY") {
            if !key.trim().is_empty() {
                config.acoustid_api_key = Some(key);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate invariants that must hold before a batch may start.
    ///
    /// **[§7]** Invalid configuration fails fast; no mutations performed.
    pub fn validate(&self) -> Result<()> {
        if self.auto_apply_threshold > 100 || self.review_threshold > 100 {
            return Err(Error::Config("thresholds must be 0..=100".to_string()));
        }
        if self.review_threshold > self.auto_apply_threshold {
            return Err(Error::Config(
                "review_threshold must not exceed auto_apply_threshold".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be positive".to_string()));
        }
        crate::organizer::validate_library_root(&self.library_root)
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn review_above_auto_apply_is_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.review_threshold = 95;
        cfg.auto_apply_threshold = 90;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.worker_count = 0;
        assert!(cfg.validate().is_err());
    }
}
