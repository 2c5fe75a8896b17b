//! Capabilities the relay depends on, and their concrete adapters.
//!
//! The pipeline only talks to the traits defined here:
//! - `ChatTransport`: long-poll ingress and outbound messages
//! - `UploadTransport`: upload slots and file transfer for attachments
//! - `MediaExtractor`: metadata extraction and format-selected downloads
//!
//! `MaxClient` implements the first two against the MAX Bot API;
//! `YtDlpExtractor` implements the third by driving the `yt-dlp` binary.

pub mod max;
pub mod ytdlp;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ArtifactKind, BotIdentity, ChatId, Cursor, OutboundMessage, PollBatch, RawMetadata};

pub use max::MaxClient;
pub use ytdlp::YtDlpExtractor;

/// Messenger-side ingress and egress.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Identity of the bot account.
    async fn me(&self) -> Result<BotIdentity>;

    /// Wait up to `timeout` for events after `cursor`. An empty batch is a
    /// normal outcome.
    async fn poll(&self, cursor: Option<Cursor>, timeout: Duration) -> Result<PollBatch>;

    /// Post a message into a chat.
    async fn post(&self, chat: ChatId, message: &OutboundMessage) -> Result<()>;

    /// Show the "typing" indicator in a chat.
    async fn set_typing(&self, chat: ChatId) -> Result<()>;
}

/// Upload slot handed out by the primary transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSlot {
    pub kind: ArtifactKind,
    /// Where the bytes go
    pub url: String,
    /// Attachment token issued up front (videos only, usually)
    pub token: Option<String>,
}

/// File transfer for attachments.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn request_upload_slot(&self, kind: ArtifactKind) -> Result<UploadSlot>;

    /// Send the file to the slot and return the server's response body.
    /// Bodies that are not JSON come back as `Value::Null`.
    async fn put_file(&self, slot: &UploadSlot, path: &Path) -> Result<serde_json::Value>;
}

/// One rung of the video download ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Already-muxed container, no transcode
    Muxed,
    /// Best available single stream
    BestSingle,
    /// Best video and best audio merged after download
    MergeBest,
}

impl Strategy {
    /// Rungs in the order they are tried.
    pub const LADDER: [Strategy; 3] = [Strategy::Muxed, Strategy::BestSingle, Strategy::MergeBest];

    /// Format selector understood by the extraction engine.
    pub fn format_selector(self) -> &'static str {
        match self {
            Strategy::Muxed => "best[ext=mp4]",
            Strategy::BestSingle => "best",
            Strategy::MergeBest => "bestvideo+bestaudio",
        }
    }

    /// Whether the rung needs a post-processing (merge) capability.
    pub fn requires_merge(self) -> bool {
        matches!(self, Strategy::MergeBest)
    }
}

/// A download request for one rung.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub strategy: Strategy,
    /// Directory the file must land in
    pub dest_dir: PathBuf,
    /// File name without extension
    pub stem: String,
    /// 1-based sub-item of a collection to download
    pub playlist_item: Option<usize>,
}

/// Metadata extraction and downloads.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Metadata for `url` without downloading anything.
    async fn extract(&self, url: &str) -> Result<RawMetadata>;

    /// Download according to `request`, returning the path of the file
    /// written.
    async fn fetch(&self, request: &FetchRequest) -> Result<PathBuf>;

    /// Whether separate streams can be merged locally.
    fn can_merge_streams(&self) -> bool;
}
