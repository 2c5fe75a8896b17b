//! Utility functions and helpers.

pub mod http;
pub mod scratch;

pub use scratch::ScratchDir;

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use url::Url;

/// Whether a chat message should be treated as a link: it must parse as an
/// absolute URL with an http(s) scheme.
pub fn is_link(text: &str) -> bool {
    Url::parse(text.trim())
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Lower-cased extension of the last path segment of a URL, ignoring the
/// query string and fragment.
pub fn url_extension(url_str: &str) -> Option<String> {
    let path = match Url::parse(url_str) {
        Ok(url) => url.path().to_string(),
        Err(_) => url_str
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 5 {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Replace everything outside `[A-Za-z0-9_-]` with `_` and cap the length.
pub fn sanitize_file_stem(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect()
}

/// Short stable name derived from a URL, for items without an identifier.
pub fn url_digest(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(&digest[..6])
}

/// Locate an executable by name on `PATH`, or accept an explicit path.
pub fn find_binary(name: &str) -> Option<PathBuf> {
    let candidate = PathBuf::from(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then_some(candidate);
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|path| path.is_file())
}

/// Truncate `text` to at most `limit` characters, appending `...` when
/// anything was cut.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
