//! Extraction output and the media types derived from it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

/// Raw metadata as reported by the extraction engine.
///
/// Every field is optional; the classifier is the only consumer and decides
/// what the combination means.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMetadata {
    /// Result type, e.g. `"playlist"` for collections
    #[serde(rename = "_type", default)]
    pub result_type: Option<String>,

    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Duration in seconds
    #[serde(default)]
    pub duration: Option<f64>,

    /// File extension of the direct media URL
    #[serde(default)]
    pub ext: Option<String>,

    /// Direct media URL
    #[serde(default)]
    pub url: Option<String>,

    /// Canonical page URL of the item
    #[serde(default)]
    pub webpage_url: Option<String>,

    #[serde(default)]
    pub original_url: Option<String>,

    /// Video codec; `"none"` for audio-only or image formats
    #[serde(default)]
    pub vcodec: Option<String>,

    #[serde(default)]
    pub thumbnails: Option<Vec<Thumbnail>>,

    /// Sub-items of a gallery/carousel; individual entries may be null
    #[serde(default)]
    pub entries: Option<Vec<Option<RawMetadata>>>,
}

impl RawMetadata {
    pub fn thumbnails(&self) -> &[Thumbnail] {
        self.thumbnails.as_deref().unwrap_or_default()
    }
}

/// A thumbnail entry; later entries are larger.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Classification of a link or sub-item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
    Gallery,
    None,
}

/// Normalized, immutable view of extracted metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    /// Candidate source URLs, most preferred first
    pub urls: Vec<String>,
    /// Title and long-form description joined by a blank line
    pub description: Option<String>,
    /// Stable identifier used to name output files
    pub id: Option<String>,
    /// 1-based position inside the parent gallery
    pub position: Option<usize>,
    /// Sub-items (galleries only)
    pub items: Vec<MediaDescriptor>,
}

impl MediaDescriptor {
    /// Descriptor for a source with no usable media.
    pub fn none(description: Option<String>, id: Option<String>) -> Self {
        Self {
            kind: MediaKind::None,
            urls: Vec::new(),
            description,
            id,
            position: None,
            items: Vec::new(),
        }
    }

    pub fn primary_url(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }

    /// File stem for artifacts derived from this descriptor.
    ///
    /// Uses the identifier when it is filesystem-safe after sanitizing,
    /// otherwise falls back to `fallback`.
    pub fn file_stem(&self, fallback: &str) -> String {
        let id = self
            .id
            .as_deref()
            .map(crate::utils::sanitize_file_stem)
            .filter(|s| !s.is_empty());
        match (id, self.position) {
            (Some(id), Some(pos)) => format!("{id}_{pos}"),
            (Some(id), None) => id,
            (None, Some(pos)) => format!("{fallback}_{pos}"),
            (None, None) => fallback.to_string(),
        }
    }
}

/// Kind of a materialized file, as understood by the upload transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Video,
    Image,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Video => "video",
            ArtifactKind::Image => "image",
        }
    }
}

/// A materialized local media file ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub descriptor: MediaDescriptor,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, kind: ArtifactKind, descriptor: MediaDescriptor) -> Self {
        Self {
            path: path.into(),
            kind,
            descriptor,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name used when uploading.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.bin", self.kind.as_str()))
    }
}
