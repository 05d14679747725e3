//! Audio file discovery.
//!
//! **Grounded on:** `wkmp-ai/src/services/file_scanner.rs`, kept nearly
//! verbatim in structure: sequential `walkdir` traversal with symlink-loop
//! detection (must stay sequential since the visited-set is mutable),
//! followed by a `rayon` parallel magic-byte verification pass. `rayon` is
//! appropriate here because this phase is bounded and joining — unlike the
//! cancellable Fingerprint Stage, which uses `tokio::task::spawn_blocking`
//! instead (see `fingerprint.rs`).

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("path not found: {0}")]
    PathNotFound(PathBuf),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
}

const IGNORE_PATTERNS: &[&str] = &[".DS_Store", "Thumbs.db", ".git", ".svn", "node_modules"];

/// Magic-byte signatures for the container formats this crate recognizes.
/// Checked only after the extension already looks like an audio file, to
/// avoid reading every non-audio file in the tree.
const MAGIC_SIGNATURES: &[(&[u8], &str)] = &[
    (b"ID3", "mp3"),
    (&[0xFF, 0xFB], "mp3"),
    (&[0xFF, 0xF3], "mp3"),
    (&[0xFF, 0xF2], "mp3"),
    (b"fLaC", "flac"),
    (b"OggS", "ogg"),
];

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "m4a", "wav", "aac", "opus"];

pub struct FileScanner {
    ignore_patterns: Vec<String>,
}

impl FileScanner {
    pub fn new() -> Self {
        Self {
            ignore_patterns: IGNORE_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Recursively discover audio files under `root_path`.
    ///
    /// Phase 1 (sequential): directory traversal with symlink-loop
    /// detection via a canonicalized-path visited-set. Phase 2 (parallel):
    /// magic-byte verification of each candidate, independent per file.
    pub fn scan(&self, root_path: &Path) -> Result<Vec<PathBuf>, ScanError> {
        if !root_path.exists() {
            return Err(ScanError::PathNotFound(root_path.to_path_buf()));
        }
        if !root_path.is_dir() {
            return Err(ScanError::NotADirectory(root_path.to_path_buf()));
        }

        let mut candidates = Vec::new();
        let mut symlink_visited = HashSet::new();

        let walker = WalkDir::new(root_path)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| self.should_process_entry(e, &mut symlink_visited));

        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    candidates.push(entry.path().to_path_buf());
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("error accessing entry during scan: {e}"),
            }
        }

        tracing::debug!(count = candidates.len(), "phase 1 scan complete");

        let audio_files: Vec<PathBuf> = candidates
            .par_iter()
            .filter_map(|path| match is_audio_file(path) {
                Ok(true) => Some(path.clone()),
                Ok(false) => None,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "error verifying file: {e}");
                    None
                }
            })
            .collect();

        tracing::debug!(count = audio_files.len(), "phase 2 verification complete");
        Ok(audio_files)
    }

    fn should_process_entry(&self, entry: &DirEntry, symlink_visited: &mut HashSet<PathBuf>) -> bool {
        let file_name = entry.file_name().to_string_lossy();
        if self.ignore_patterns.iter().any(|p| file_name.contains(p.as_str())) {
            return false;
        }
        if entry.file_type().is_symlink() {
            if let Ok(canonical) = entry.path().canonicalize() {
                if !symlink_visited.insert(canonical) {
                    tracing::warn!(path = %entry.path().display(), "symlink loop detected");
                    return false;
                }
            }
        }
        true
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn is_audio_file(path: &Path) -> std::io::Result<bool> {
    let ext = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => return Ok(false),
    };
    if !AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        return Ok(false);
    }
    verify_magic_bytes(path)
}

fn verify_magic_bytes(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; 4];
    let n = file.read(&mut buf)?;
    if n == 0 {
        return Ok(false);
    }
    // WAV/AIFF don't share a prefix with the table above; fall back to the
    // RIFF/FORM container tags directly rather than growing the table.
    if &buf[..n.min(4)] == b"RIFF" || &buf[..n.min(4)] == b"FORM" {
        return Ok(true);
    }
    for (signature, _format) in MAGIC_SIGNATURES {
        if n >= signature.len() && &buf[..signature.len()] == *signature {
            return Ok(true);
        }
    }
    // m4a/aac live inside an ftyp-tagged ISO-BMFF container at offset 4;
    // accept by extension alone since a false positive here only costs an
    // extra failed fingerprint attempt downstream.
    Ok(matches!(ext_of(path).as_deref(), Some("m4a") | Some("aac")))
}

fn ext_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn scan_rejects_missing_root() {
        let scanner = FileScanner::new();
        let result = scanner.scan(Path::new("/nonexistent/path/for/sure"));
        assert!(matches!(result, Err(ScanError::PathNotFound(_))));
    }

    #[test]
    fn scan_finds_flac_by_magic_bytes_even_with_wrong_content_hint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.flac");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"fLaC\x00\x00\x00\x22").unwrap();

        let scanner = FileScanner::new();
        let found = scanner.scan(dir.path()).unwrap();
        assert_eq!(found, vec![path]);
    }

    #[test]
    fn scan_ignores_non_audio_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"not audio").unwrap();
        std::fs::write(dir.path().join(".DS_Store"), b"junk").unwrap();

        let scanner = FileScanner::new();
        let found = scanner.scan(dir.path()).unwrap();
        assert!(found.is_empty());
    }
}
