//! Content classification.
//!
//! Maps raw extraction output onto a [`MediaDescriptor`]. The rules are an
//! ordered ladder; the first one that matches wins:
//!
//! 1. nested sub-items: gallery (each sub-item goes through rules 2-4)
//! 2. duration, a video extension, or a real video codec: video
//! 3. a direct URL with an image extension: image
//! 4. any thumbnail: image (largest, i.e. last, thumbnail)
//! 5. otherwise: none

use crate::models::{MediaDescriptor, MediaKind, RawMetadata};
use crate::utils::url_extension;

/// Extensions that mark a direct video file.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv", "m4v", "avi", "flv", "3gp"];

/// Extensions that mark a direct image file.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Classify extraction output for the link `source`.
pub fn classify(raw: &RawMetadata, source: &str) -> MediaDescriptor {
    let description = describe(raw);

    if raw.entries.is_some() || raw.result_type.as_deref() == Some("playlist") {
        let items = raw
            .entries
            .iter()
            .flatten()
            .enumerate()
            .filter_map(|(idx, entry)| entry.as_ref().map(|e| (idx + 1, e)))
            .filter_map(|(position, entry)| {
                let mut item = classify_item(entry, Some(source))?;
                item.position = Some(position);
                Some(item)
            })
            .collect();
        return MediaDescriptor {
            kind: MediaKind::Gallery,
            urls: vec![source.to_string()],
            description,
            id: raw.id.clone(),
            position: None,
            items,
        };
    }

    match classify_item(raw, Some(source)) {
        Some(mut item) => {
            item.description = description;
            item
        }
        None => MediaDescriptor::none(description, raw.id.clone()),
    }
}

/// Rules 2-4 for a single item. `None` when nothing usable was found.
fn classify_item(raw: &RawMetadata, source: Option<&str>) -> Option<MediaDescriptor> {
    let item = |kind, urls: Vec<String>| MediaDescriptor {
        kind,
        urls,
        description: None,
        id: raw.id.clone(),
        position: None,
        items: Vec::new(),
    };

    if is_video(raw) {
        let urls = dedup(
            [
                raw.webpage_url.as_deref(),
                raw.original_url.as_deref(),
                source,
            ]
            .into_iter()
            .flatten(),
        );
        return (!urls.is_empty()).then(|| item(MediaKind::Video, urls));
    }

    if let Some(url) = raw.url.as_deref().filter(|url| has_image_extension(raw, url)) {
        return Some(item(MediaKind::Image, vec![url.to_string()]));
    }

    raw.thumbnails()
        .last()
        .filter(|thumb| !thumb.url.is_empty())
        .map(|thumb| item(MediaKind::Image, vec![thumb.url.clone()]))
}

fn is_video(raw: &RawMetadata) -> bool {
    raw.duration.is_some_and(|d| d > 0.0)
        || raw
            .ext
            .as_deref()
            .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        || raw.vcodec.as_deref().is_some_and(|codec| !codec.is_empty() && codec != "none")
}

fn has_image_extension(raw: &RawMetadata, url: &str) -> bool {
    let ext = raw
        .ext
        .as_deref()
        .map(str::to_ascii_lowercase)
        .or_else(|| url_extension(url));
    ext.is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Title and description joined by a blank line.
fn describe(raw: &RawMetadata) -> Option<String> {
    let parts: Vec<&str> = [raw.title.as_deref(), raw.description.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

fn dedup<'a>(urls: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for url in urls.filter(|u| !u.is_empty()) {
        if !out.iter().any(|seen| seen == url) {
            out.push(url.to_string());
        }
    }
    out
}
