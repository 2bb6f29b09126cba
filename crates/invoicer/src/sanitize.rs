//! Helpers for turning user-supplied file names into storage key components
//! and for keeping remote error text out of logs at full length.

use std::path::Path;

/// Longest remote error body kept in logs and error messages.
pub const MAX_ERROR_BODY_LENGTH: usize = 500;

/// File name without directories and without its final extension.
///
/// `scans/acme-0042.png` becomes `acme-0042`; `archive.tar.gz` becomes
/// `archive.tar`. Names with no usable stem fall back to `unnamed`.
pub fn base_name(file_name: &str) -> String {
    let last = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);

    let stem = Path::new(last)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    let cleaned = key_component(stem);
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// Replaces characters that would change the meaning of an object key.
///
/// Slashes would create nested "folders", control characters break S3
/// signing and most UIs. Everything else passes through.
pub fn key_component(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .trim_matches('.')
        .to_string()
}

/// Truncates text to `MAX_ERROR_BODY_LENGTH` characters on a char boundary.
pub fn truncate_for_log(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
        Some((idx, _)) => format!("{}... (truncated)", &body[..idx]),
        None => body.to_string(),
    }
}
