//! Destination path template rendering.
//!
//! Templates use `{field}` placeholders (`{artist}`, `{album}`, `{year}`,
//! `{title}`, `{track:02}` for zero-padded track numbers) resolved against
//! a track's chosen candidate, falling back to existing tags and finally
//! literal placeholders like `Unknown Artist` when nothing is known.

use crate::types::{MatchCandidate, Track};

pub fn render_template(template: &str, track: &Track, candidate: &MatchCandidate) -> String {
    let artist = candidate
        .artist
        .clone()
        .or_else(|| track.existing_tags.artist.clone())
        .unwrap_or_else(|| "Unknown Artist".to_string());
    let album = candidate
        .album
        .clone()
        .or_else(|| track.existing_tags.album.clone())
        .unwrap_or_else(|| "Unknown Album".to_string());
    let title = candidate
        .title
        .clone()
        .unwrap_or_else(|| track.title_or_filename_stem());
    let year = candidate
        .year
        .or(track.existing_tags.year)
        .map(|y| y.to_string())
        .unwrap_or_else(|| "0000".to_string());
    let track_number = candidate.track_number.or(track.existing_tags.track_number).unwrap_or(0);

    let mut out = template.to_string();
    out = out.replace("{artist}", &artist);
    out = out.replace("{album}", &album);
    out = out.replace("{title}", &title);
    out = out.replace("{year}", &year);
    out = out.replace("{track:02}", &format!("{track_number:02}"));
    out = out.replace("{track}", &track_number.to_string());
    out
}
