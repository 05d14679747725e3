//! Path safety invariants: library-root depth floor, reserved-character
//! and reserved-name sanitization, and length-capped smart truncation.

use std::path::{Component, Path};

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const MAX_PATH_COMPONENT_LEN: usize = 255;

/// The library root must sit at least two filesystem levels below the
/// filesystem root (blocks `/`, `/usr`, `C:\Windows`, etc.).
pub fn validate_library_root(root: &Path) -> Result<(), String> {
    let depth = root
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count();
    if depth < 2 {
        return Err(format!(
            "library root {} must be at least two levels below the filesystem root",
            root.display()
        ));
    }
    Ok(())
}

/// Sanitize a single path component: strip reserved characters, rename
/// OS-reserved device names, collapse to a safe placeholder if empty.
pub fn sanitize_component(input: &str) -> String {
    let mut cleaned: String = input
        .chars()
        .map(|c| if RESERVED_CHARS.contains(&c) { '_' } else { c })
        .collect();
    cleaned = cleaned.trim().trim_matches('.').to_string();

    if cleaned.is_empty() {
        cleaned = "_".to_string();
    }

    let upper = cleaned.to_uppercase();
    let base = upper.split('.').next().unwrap_or(&upper);
    if RESERVED_NAMES.contains(&base) {
        cleaned = format!("_{cleaned}");
    }

    if cleaned.len() > MAX_PATH_COMPONENT_LEN {
        cleaned.truncate(MAX_PATH_COMPONENT_LEN);
    }
    cleaned
}

/// Sanitize a filename stem and cap the full `<stem>.<ext>` length,
/// smart-truncating the stem (not the extension) when over budget.
pub fn sanitize_filename(stem: &str, ext: &str, max_len: usize) -> String {
    let clean_stem = sanitize_component(stem);
    if ext.is_empty() {
        return truncate_to(&clean_stem, max_len);
    }
    let budget = max_len.saturating_sub(ext.len() + 1);
    let truncated_stem = truncate_to(&clean_stem, budget);
    format!("{truncated_stem}.{ext}")
}

fn truncate_to(input: &str, max_len: usize) -> String {
    if input.chars().count() <= max_len {
        return input.to_string();
    }
    input.chars().take(max_len).collect()
}
