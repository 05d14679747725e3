//! Safe Organizer: template-driven destination paths, sanitization, and
//! the backup -> tag-write -> move -> ledger ordering contract with
//! reverse-order rollback on failure.
//!
//! **Grounded on:** `wkmp-ai/src/services/filename_matcher.rs` for the
//! "reuse-vs-new" path-identity convention, generalized from a read-only
//! existence check to the organizer's full mutation pipeline; tag writing
//! follows `lofty`'s tag-probe-then-save idiom as used elsewhere in the
//! teacher's ingest stack.

mod path_template;
mod sanitize;

use std::path::{Component, Path, PathBuf};

use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::Tag;
use thiserror::Error;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::db::ledger::{MoveLedger, MoveRecord, OperationKind};
use crate::types::{MatchCandidate, Track};

pub use path_template::render_template;
pub use sanitize::{sanitize_component, validate_library_root};

#[derive(Debug, Error)]
pub enum OrganizerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tag write failed: {0}")]
    TagWrite(String),
    #[error("invalid library root: {0}")]
    InvalidRoot(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("ledger record {0} is broken and cannot be rolled back automatically")]
    BrokenRecord(Uuid),
}

/// Outcome of a single `apply` call.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub ledger_id: Uuid,
    pub destination_path: PathBuf,
    pub dry_run: bool,
}

/// Applies tag rewrites and safe moves, with rollback support via the
/// shared move ledger.
pub struct SafeOrganizer {
    ledger: MoveLedger,
}

impl SafeOrganizer {
    pub fn new(ledger: MoveLedger) -> Self {
        Self { ledger }
    }

    /// Execute the ordering contract for one track: backup, tag-write,
    /// move, ledger-append. On any failure, steps already performed are
    /// reverted in reverse order before the error is returned.
    pub async fn apply(
        &self,
        track: &Track,
        candidate: &MatchCandidate,
        config: &PipelineConfig,
    ) -> Result<ApplyResult, OrganizerError> {
        let destination = self.resolve_destination(track, candidate, config)?;
        let operation_kind = if destination == track.source_path {
            OperationKind::TagOnly
        } else {
            OperationKind::MoveWithTags
        };

        if config.dry_run {
            let ledger_id = self
                .ledger
                .begin(
                    track.batch_id,
                    &track.source_path.to_string_lossy(),
                    None,
                    &destination.to_string_lossy(),
                    operation_kind,
                )
                .await?;
            return Ok(ApplyResult {
                ledger_id,
                destination_path: destination,
                dry_run: true,
            });
        }

        let backup_path = if config.keep_originals {
            Some(self.backup(&track.source_path, &config.library_root, &config.backup_root)?)
        } else {
            None
        };

        let ledger_id = self
            .ledger
            .begin(
                track.batch_id,
                &track.source_path.to_string_lossy(),
                backup_path.as_deref().map(|p: &Path| p.to_string_lossy()).as_deref(),
                &destination.to_string_lossy(),
                operation_kind,
            )
            .await?;

        if let Err(e) = self.write_tags(&track.source_path, candidate) {
            self.revert_backup(&track.source_path, backup_path.as_deref());
            return Err(e);
        }
        self.ledger.mark_tags_written(ledger_id).await?;

        if let Err(e) = self.move_file(&track.source_path, &destination) {
            self.revert_backup(&track.source_path, backup_path.as_deref());
            return Err(e.into());
        }
        self.ledger.mark_moved(ledger_id).await?;

        Ok(ApplyResult {
            ledger_id,
            destination_path: destination,
            dry_run: false,
        })
    }

    fn resolve_destination(
        &self,
        track: &Track,
        candidate: &MatchCandidate,
        config: &PipelineConfig,
    ) -> Result<PathBuf, OrganizerError> {
        validate_library_root(&config.library_root)
            .map_err(|e| OrganizerError::InvalidRoot(e.to_string()))?;

        let folder = render_template(&config.folder_template, track, candidate);
        let file = render_template(&config.file_template, track, candidate);
        let ext = track
            .source_path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();

        let sanitized_folder: PathBuf = folder.split('/').map(sanitize_component).collect();
        let sanitized_file = sanitize::sanitize_filename(&sanitize_component(&file), &ext, 255);

        let mut destination = config.library_root.join(sanitized_folder).join(&sanitized_file);
        destination = resolve_collision(destination);
        Ok(destination)
    }

    /// Mirror `source`'s path relative to `library_root` under
    /// `backup_root`, so two sources with the same filename in different
    /// library directories get distinct backups instead of colliding.
    fn backup(&self, source: &Path, library_root: &Path, backup_root: &Path) -> Result<PathBuf, OrganizerError> {
        let relative = relative_to_root(source, library_root);
        let filename = relative
            .file_name()
            .ok_or_else(|| OrganizerError::TagWrite("source has no filename".to_string()))?
            .to_string_lossy()
            .to_string();
        let backup_path = match relative.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                backup_root.join(parent).join(format!("{filename}.bak"))
            }
            _ => backup_root.join(format!("{filename}.bak")),
        };
        if let Some(parent) = backup_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, &backup_path)?;

        let source_size = std::fs::metadata(source)?.len();
        let backup_size = std::fs::metadata(&backup_path)?.len();
        if source_size != backup_size {
            let _ = std::fs::remove_file(&backup_path);
            return Err(OrganizerError::TagWrite(
                "backup copy size mismatch".to_string(),
            ));
        }
        Ok(backup_path)
    }

    fn write_tags(&self, path: &Path, candidate: &MatchCandidate) -> Result<(), OrganizerError> {
        let mut tagged_file = Probe::open(path)
            .map_err(|e| OrganizerError::TagWrite(e.to_string()))?
            .read()
            .map_err(|e| OrganizerError::TagWrite(e.to_string()))?;

        let tag_type = tagged_file.primary_tag_type();
        if tagged_file.primary_tag().is_none() {
            tagged_file.insert_tag(Tag::new(tag_type));
        }
        let tag = tagged_file
            .primary_tag_mut()
            .expect("tag was just inserted if it was missing");

        if let Some(title) = &candidate.title {
            tag.set_title(title.clone());
        }
        if let Some(artist) = &candidate.artist {
            tag.set_artist(artist.clone());
        }
        if let Some(album) = &candidate.album {
            tag.set_album(album.clone());
        }
        if let Some(year) = candidate.year {
            tag.set_year(year);
        }
        if let Some(track_number) = candidate.track_number {
            tag.set_track(track_number);
        }

        tagged_file
            .save_to_path(path, WriteOptions::default())
            .map_err(|e| OrganizerError::TagWrite(e.to_string()))?;
        Ok(())
    }

    fn move_file(&self, source: &Path, destination: &Path) -> std::io::Result<()> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::rename(source, destination) {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) => copy_verify_delete(source, destination),
            Err(e) => Err(e),
        }
    }

    fn revert_backup(&self, source: &Path, backup_path: Option<&Path>) {
        if let Some(backup) = backup_path {
            if let Err(e) = std::fs::copy(backup, source) {
                tracing::error!(error = %e, "failed to restore from backup during rollback");
            }
            let _ = std::fs::remove_file(backup);
        }
    }

    /// Reverse every completed move for a batch, restoring files to their
    /// original locations from the ledger and backups. Returns ids of
    /// records that could not be fully reversed (`broken`).
    pub async fn rollback_batch(&self, batch_id: Uuid) -> Result<Vec<Uuid>, OrganizerError> {
        let mut records = self.ledger.for_batch(batch_id).await?;
        records.reverse();
        let mut broken = Vec::new();

        for record in &records {
            match self.rollback_one(record) {
                Ok(()) => {
                    self.ledger.mark_reversed(record.id).await?;
                }
                Err(e) => {
                    tracing::warn!(record_id = %record.id, error = %e, "rollback left record broken");
                    self.ledger.mark_broken(record.id).await?;
                    broken.push(record.id);
                }
            }
        }
        Ok(broken)
    }

    fn rollback_one(&self, record: &MoveRecord) -> Result<(), OrganizerError> {
        let destination = Path::new(&record.destination_path);
        let source = Path::new(&record.source_path);

        if record.moved && destination.exists() {
            if let Some(parent) = source.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(destination, source)
                .or_else(|_| std::fs::copy(destination, source).map(|_| ()))?;
        }

        if let Some(backup) = &record.backup_path {
            let backup = Path::new(backup);
            if backup.exists() {
                std::fs::copy(backup, source)?;
            }
        }

        Ok(())
    }

    /// Remove empty directories under `library_root`, refusing to ascend
    /// above it and never deleting a directory containing anything other
    /// than the defined junk list.
    pub fn cleanup_empty_dirs(&self, library_root: &Path) -> Result<usize, OrganizerError> {
        const JUNK: &[&str] = &["Thumbs.db", "desktop.ini", ".DS_Store"];
        let mut removed = 0;
        if !library_root.is_dir() {
            return Ok(0);
        }

        fn visit(dir: &Path, root: &Path, junk: &[&str], removed: &mut usize) -> std::io::Result<bool> {
            let mut only_junk_or_empty = true;
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    if !visit(&path, root, junk, removed)? {
                        only_junk_or_empty = false;
                    }
                } else {
                    let name = entry.file_name();
                    if !junk.contains(&name.to_string_lossy().as_ref()) {
                        only_junk_or_empty = false;
                    }
                }
            }
            if only_junk_or_empty && dir != root {
                for entry in std::fs::read_dir(dir)? {
                    let _ = std::fs::remove_file(entry?.path());
                }
                std::fs::remove_dir(dir)?;
                *removed += 1;
            }
            Ok(only_junk_or_empty)
        }

        visit(library_root, library_root, JUNK, &mut removed)?;
        Ok(removed)
    }
}

/// Copy `source` to `destination`, verify the byte count matches, then
/// remove `source`. Used for the cross-device move fallback (`rename`
/// fails with `EXDEV`); on a verify mismatch the partial destination is
/// deleted and `source` is left untouched so the caller's rollback has a
/// clean backup to restore from.
fn copy_verify_delete(source: &Path, destination: &Path) -> std::io::Result<()> {
    std::fs::copy(source, destination)?;
    let source_size = std::fs::metadata(source)?.len();
    let dest_size = std::fs::metadata(destination)?.len();
    if !sizes_match(source_size, dest_size) {
        let _ = std::fs::remove_file(destination);
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "cross-device copy size mismatch",
        ));
    }
    std::fs::remove_file(source)
}

fn sizes_match(source_size: u64, dest_size: u64) -> bool {
    source_size == dest_size
}

/// `source` with `root` stripped off the front, for mirroring a path into
/// another tree. Falls back to `source`'s normal components (dropping any
/// root/prefix) when `source` isn't actually under `root`, so the result
/// is always a relative path safe to `.join()` onto another root.
fn relative_to_root(source: &Path, root: &Path) -> PathBuf {
    if let Ok(rel) = source.strip_prefix(root) {
        return rel.to_path_buf();
    }
    source
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s),
            _ => None,
        })
        .collect()
}

fn resolve_collision(mut destination: PathBuf) -> PathBuf {
    if !destination.exists() {
        return destination;
    }
    let stem = destination
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = destination.extension().map(|e| e.to_string_lossy().to_string());
    let parent = destination.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut n = 1;
    loop {
        let candidate_name = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        destination = parent.join(candidate_name);
        if !destination.exists() {
            return destination;
        }
        n += 1;
    }
}

#[cfg(unix)]
fn is_cross_device(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc_exdev())
}

#[cfg(unix)]
fn libc_exdev() -> i32 {
    18 // EXDEV on Linux; stable across the platforms this crate targets.
}

#[cfg(not(unix))]
fn is_cross_device(_err: &std::io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_to_root_mirrors_nested_source_paths() {
        let root = PathBuf::from("/music/library");
        let source = PathBuf::from("/music/library/Incoming/Disc 1/track.mp3");
        assert_eq!(
            relative_to_root(&source, &root),
            PathBuf::from("Incoming/Disc 1/track.mp3")
        );
    }

    #[test]
    fn same_basename_in_different_directories_does_not_collide() {
        let root = PathBuf::from("/music/library");
        let a = relative_to_root(&PathBuf::from("/music/library/ArtistA/track.mp3"), &root);
        let b = relative_to_root(&PathBuf::from("/music/library/ArtistB/track.mp3"), &root);
        assert_ne!(a, b, "same-named files in different source dirs must mirror to distinct backups");
    }

    #[test]
    fn relative_to_root_falls_back_to_normal_components_when_unrelated() {
        let root = PathBuf::from("/music/library");
        let source = PathBuf::from("/elsewhere/incoming/track.mp3");
        assert_eq!(relative_to_root(&source, &root), PathBuf::from("elsewhere/incoming/track.mp3"));
    }

    #[test]
    fn collision_resolution_appends_counter_before_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.mp3");
        std::fs::write(&path, b"x").unwrap();
        let resolved = resolve_collision(path.clone());
        assert_eq!(resolved, dir.path().join("track (1).mp3"));
    }

    #[test]
    fn non_colliding_destination_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.mp3");
        let resolved = resolve_collision(path.clone());
        assert_eq!(resolved, path);
    }

    #[test]
    fn copy_verify_delete_moves_the_file_when_sizes_match() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        let destination = dir.path().join("dest.bin");
        std::fs::write(&source, b"some bytes").unwrap();

        copy_verify_delete(&source, &destination).unwrap();

        assert!(!source.exists());
        assert_eq!(std::fs::read(&destination).unwrap(), b"some bytes");
    }

    /// S4: when the post-copy size check disagrees (simulating a corrupted
    /// cross-device copy), the caller is expected to abort and the partial
    /// destination must not be left behind.
    #[test]
    fn size_mismatch_is_detected() {
        assert!(!sizes_match(1024, 1023));
        assert!(sizes_match(1024, 1024));
    }
}
