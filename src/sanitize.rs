//! Filesystem-safe names for attachments and backup directories.
//!
//! Everything here is pure except [`deduplicate_path`], which only inspects
//! the target directory. Nothing is created on disk.

use std::path::{Path, PathBuf};

/// Maximum length of a stored filename, in bytes.
pub const MAX_FILENAME_BYTES: usize = 255;

/// Characters that are never allowed in a stored name.
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

fn is_forbidden(c: char) -> bool {
    FORBIDDEN.contains(&c) || c.is_control()
}

/// Replace separator, reserved and control characters with `_`.
///
/// No trimming, length or leading-digit rules are applied. Used for
/// directory names derived from account addresses.
pub fn sanitize_path_component(s: &str) -> String {
    s.chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect()
}

/// Turn an untrusted attachment filename into a safe, bounded one.
///
/// - a name made only of whitespace and periods becomes `attachment_<fallback_id>`
/// - `< > : " / \ | ? *` and control characters (CR and LF included) become `_`
/// - leading and trailing spaces and periods are stripped
/// - an empty result becomes `attachment_<fallback_id>`
/// - a leading ASCII digit gets an `f_` prefix
/// - the result is cut to [`MAX_FILENAME_BYTES`], keeping the extension
pub fn sanitize_filename(raw: &str, fallback_id: &str) -> String {
    let raw = raw.trim_matches(|c: char| c.is_whitespace() || c == '.');
    let replaced = sanitize_path_component(raw);
    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');

    if trimmed.is_empty() {
        let fallback = format!("attachment_{}", sanitize_path_component(fallback_id));
        return truncate_preserving_extension(&fallback, MAX_FILENAME_BYTES);
    }

    let name = if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        format!("f_{trimmed}")
    } else {
        trimmed.to_string()
    };

    truncate_preserving_extension(&name, MAX_FILENAME_BYTES)
}

/// Return `dir/filename` if nothing exists there, otherwise the first free
/// `dir/<stem>_<n><ext>` for n = 1, 2, …
///
/// Suffixed names never exceed [`MAX_FILENAME_BYTES`]. The stem is cut
/// first; when the extension alone leaves no room, the name is cut and the
/// suffix goes last.
///
/// Deterministic for a given directory state. Not safe against concurrent
/// writers to the same directory; each message directory has one writer.
pub fn deduplicate_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if is_free(&candidate) {
        return candidate;
    }

    let mut counter: u64 = 1;
    loop {
        let candidate = dir.join(suffixed_name(filename, &format!("_{counter}")));
        if is_free(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

fn suffixed_name(filename: &str, suffix: &str) -> String {
    let (stem, ext) = split_extension(filename);
    let budget = MAX_FILENAME_BYTES.saturating_sub(suffix.len());

    if stem.len() + ext.len() <= budget {
        format!("{stem}{suffix}{ext}")
    } else if ext.len() < budget {
        format!("{}{suffix}{ext}", truncate_bytes(stem, budget - ext.len()))
    } else {
        format!("{}{suffix}", truncate_bytes(filename, budget))
    }
}

/// A dangling symlink still occupies the name.
fn is_free(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_err()
}

/// Split `name` into stem and extension (the extension keeps its dot).
///
/// A dot in first position does not start an extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a character.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn truncate_preserving_extension(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }

    let (stem, ext) = split_extension(name);
    if ext.len() < max {
        let stem = truncate_bytes(stem, max - ext.len());
        if !stem.is_empty() {
            return format!("{stem}{ext}");
        }
    }

    // The extension alone does not fit: cut the whole name instead.
    truncate_bytes(name, max).to_string()
}
