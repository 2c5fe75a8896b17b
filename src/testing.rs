//! In-memory capability doubles shared by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::models::{
    ArtifactKind, BotIdentity, ChatId, Cursor, OutboundMessage, PollBatch, RawMetadata,
};
use crate::services::{
    ChatTransport, FetchRequest, MediaExtractor, Strategy, UploadSlot, UploadTransport,
};
use crate::storage::{CursorStore, FallbackStorage};

// ---- chat ----

/// Records every outbound call; polls are served from a script.
#[derive(Default)]
pub struct MockChat {
    pub posted: Mutex<Vec<(ChatId, OutboundMessage)>>,
    pub typing: Mutex<Vec<ChatId>>,
    pub polls: Mutex<VecDeque<std::result::Result<PollBatch, String>>>,
    pub poll_cursors: Mutex<Vec<Option<Cursor>>>,
    /// Attachment posts fail while this is non-zero (decremented per failure)
    pub attachment_failures: Mutex<u32>,
    pub attachment_attempts: Mutex<Vec<Instant>>,
    /// Formatted text posts fail while this is non-zero
    pub formatted_failures: Mutex<u32>,
    pub bot_id: i64,
}

impl MockChat {
    pub fn new() -> Self {
        Self {
            bot_id: 1,
            ..Self::default()
        }
    }

    pub fn failing_attachments(failures: u32) -> Self {
        let chat = Self::new();
        *chat.attachment_failures.lock().unwrap() = failures;
        chat
    }

    pub fn push_poll(&self, batch: std::result::Result<PollBatch, String>) {
        self.polls.lock().unwrap().push_back(batch);
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.posted.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.text).collect()
    }
}

#[async_trait]
impl ChatTransport for MockChat {
    async fn me(&self) -> Result<BotIdentity> {
        Ok(BotIdentity {
            user_id: self.bot_id,
            name: Some("relay".into()),
            username: None,
        })
    }

    async fn poll(&self, cursor: Option<Cursor>, _timeout: Duration) -> Result<PollBatch> {
        self.poll_cursors.lock().unwrap().push(cursor);
        let next = self.polls.lock().unwrap().pop_front();
        match next {
            Some(Ok(batch)) => Ok(batch),
            Some(Err(message)) => Err(AppError::Ingress(message)),
            None => std::future::pending().await,
        }
    }

    async fn post(&self, chat: ChatId, message: &OutboundMessage) -> Result<()> {
        if !message.attachments.is_empty() {
            self.attachment_attempts.lock().unwrap().push(Instant::now());
            let mut failures = self.attachment_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::api("/messages", 400, "attachment.not.ready"));
            }
        }
        if message.format.is_some() {
            let mut failures = self.formatted_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::api("/messages", 400, "text.invalid"));
            }
        }
        self.posted.lock().unwrap().push((chat, message.clone()));
        Ok(())
    }

    async fn set_typing(&self, chat: ChatId) -> Result<()> {
        self.typing.lock().unwrap().push(chat);
        Ok(())
    }
}

// ---- extraction ----

/// Serves canned metadata and writes fake files for downloads.
#[derive(Default)]
pub struct MockExtractor {
    pub metadata: HashMap<String, RawMetadata>,
    /// Rungs that fail outright
    pub failing: HashSet<Strategy>,
    /// Rungs that report a file but leave it empty
    pub empty: HashSet<Strategy>,
    pub merge: bool,
    pub requests: Mutex<Vec<FetchRequest>>,
}

impl MockExtractor {
    pub fn with(url: &str, raw: serde_json::Value) -> Self {
        let mut extractor = Self::default();
        extractor.add(url, raw);
        extractor
    }

    pub fn add(&mut self, url: &str, raw: serde_json::Value) {
        let parsed = serde_json::from_value(raw).unwrap();
        self.metadata.insert(url.to_string(), parsed);
    }

    pub fn strategies_tried(&self) -> Vec<Strategy> {
        self.requests.lock().unwrap().iter().map(|r| r.strategy).collect()
    }
}

#[async_trait]
impl MediaExtractor for MockExtractor {
    async fn extract(&self, url: &str) -> Result<RawMetadata> {
        self.metadata
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::extraction(url, "Unsupported URL"))
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<PathBuf> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing.contains(&request.strategy) {
            return Err(AppError::extraction(&request.url, "Requested format is not available"));
        }
        let path = request.dest_dir.join(format!("{}.mp4", request.stem));
        let bytes: &[u8] = if self.empty.contains(&request.strategy) {
            b""
        } else {
            b"video-bytes"
        };
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    fn can_merge_streams(&self) -> bool {
        self.merge
    }
}

// ---- upload ----

/// Upload transport whose `put_file` answers come from a script; once the
/// script runs out the last answer repeats.
pub struct MockUploader {
    pub slot_token: Option<String>,
    pub responses: Mutex<VecDeque<std::result::Result<serde_json::Value, String>>>,
    pub last: Mutex<std::result::Result<serde_json::Value, String>>,
    pub slot_requests: Mutex<Vec<ArtifactKind>>,
    pub put_attempts: Mutex<Vec<Instant>>,
}

impl MockUploader {
    /// Every upload succeeds with `{"token": token}`.
    pub fn ok(token: &str) -> Self {
        Self::scripted(vec![Ok(serde_json::json!({"token": token}))])
    }

    /// Every upload fails with a transport error.
    pub fn failing() -> Self {
        Self::scripted(vec![Err("connection reset".into())])
    }

    pub fn scripted(script: Vec<std::result::Result<serde_json::Value, String>>) -> Self {
        let last = script
            .last()
            .cloned()
            .unwrap_or_else(|| Ok(serde_json::Value::Null));
        Self {
            slot_token: None,
            responses: Mutex::new(script.into()),
            last: Mutex::new(last),
            slot_requests: Mutex::new(Vec::new()),
            put_attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn puts(&self) -> usize {
        self.put_attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl UploadTransport for MockUploader {
    async fn request_upload_slot(&self, kind: ArtifactKind) -> Result<UploadSlot> {
        self.slot_requests.lock().unwrap().push(kind);
        Ok(UploadSlot {
            kind,
            url: "https://upload.example/slot".into(),
            token: self.slot_token.clone(),
        })
    }

    async fn put_file(&self, _slot: &UploadSlot, path: &Path) -> Result<serde_json::Value> {
        self.put_attempts.lock().unwrap().push(Instant::now());
        assert!(path.exists(), "uploading a file that does not exist");
        let next = self.responses.lock().unwrap().pop_front();
        let answer = next.unwrap_or_else(|| self.last.lock().unwrap().clone());
        answer.map_err(|message| AppError::api("upload slot", 502, message))
    }
}

// ---- storage ----

/// Fallback storage returning a fixed URL, or failing.
pub struct MockFallback {
    pub result: std::result::Result<String, String>,
    pub stored: Mutex<Vec<PathBuf>>,
}

impl MockFallback {
    pub fn ok(url: &str) -> Self {
        Self {
            result: Ok(url.to_string()),
            stored: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: Err("disk quota exceeded".into()),
            stored: Mutex::new(Vec::new()),
        }
    }

    pub fn stored(&self) -> Vec<PathBuf> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl FallbackStorage for MockFallback {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn store(&self, path: &Path) -> Result<String> {
        self.stored.lock().unwrap().push(path.to_path_buf());
        self.result.clone().map_err(AppError::fallback)
    }
}

/// Cursor store held in memory; records every save.
#[derive(Default)]
pub struct MemoryCursorStore {
    pub value: Mutex<Option<Cursor>>,
    pub saves: Mutex<Vec<Cursor>>,
}

impl MemoryCursorStore {
    pub fn with(cursor: Cursor) -> Self {
        Self {
            value: Mutex::new(Some(cursor)),
            saves: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<Option<Cursor>> {
        Ok(*self.value.lock().unwrap())
    }

    async fn save(&self, cursor: Cursor) -> Result<()> {
        *self.value.lock().unwrap() = Some(cursor);
        self.saves.lock().unwrap().push(cursor);
        Ok(())
    }
}
