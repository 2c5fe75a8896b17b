// src/pipeline/deliver.rs

//! Delivery engine.
//!
//! Each artifact goes through three phases:
//!
//! 1. **Upload**: get a slot, send the bytes, resolve an attachment token.
//!    Transport errors are retried with exponential backoff.
//! 2. **Announce**: post the attachment. The server may still be processing
//!    the upload, so every attempt is preceded by a growing pause.
//! 3. **Fallback**: when either phase gives up, the file goes to secondary
//!    storage and the chat receives a link instead.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{
    Artifact, ArtifactKind, AttachmentRef, ChatId, DeliveryConfig, DeliveryOutcome, Messages,
    OutboundMessage,
};
use crate::pipeline::retry::{RetryPolicy, retry};
use crate::services::{ChatTransport, UploadSlot, UploadTransport};
use crate::storage::FallbackStorage;

/// Pick the attachment token out of an upload response.
///
/// Videos are identified by the token issued with the slot when there is
/// one. Images are identified by the upload response itself, which comes in
/// a few shapes: `token`, the first `photos.<key>.token` in response order, `photo_id`, then `id`/`url`.
pub fn resolve_token(slot: &UploadSlot, response: &Value) -> Option<String> {
    let as_token = |value: &Value| match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };

    match slot.kind {
        ArtifactKind::Video => slot
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| response.get("token").and_then(as_token)),
        ArtifactKind::Image => {
            if let Some(token) = response.get("token") {
                return as_token(token);
            }
            let photo_token = response
                .get("photos")
                .and_then(Value::as_object)
                .and_then(|photos| photos.values().find_map(|p| p.get("token").and_then(as_token)));
            if photo_token.is_some() {
                return photo_token;
            }
            if let Some(photo_id) = response.get("photo_id") {
                return as_token(photo_id);
            }
            response
                .get("id")
                .and_then(as_token)
                .or_else(|| response.get("url").and_then(as_token))
        }
    }
}

/// Uploads artifacts to the primary transport, falling back to secondary
/// storage.
#[derive(Clone)]
pub struct DeliveryEngine {
    chat: Arc<dyn ChatTransport>,
    uploader: Arc<dyn UploadTransport>,
    fallback: Option<Arc<dyn FallbackStorage>>,
    messages: Arc<Messages>,
    upload_policy: RetryPolicy,
    announce_policy: RetryPolicy,
}

impl DeliveryEngine {
    pub fn new(
        chat: Arc<dyn ChatTransport>,
        uploader: Arc<dyn UploadTransport>,
        fallback: Option<Arc<dyn FallbackStorage>>,
        messages: Arc<Messages>,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            chat,
            uploader,
            fallback,
            messages,
            upload_policy: RetryPolicy::new(
                config.upload_attempts,
                Duration::from_millis(config.upload_base_delay_ms),
            ),
            announce_policy: RetryPolicy::new(
                config.announce_attempts,
                Duration::from_secs(config.announce_base_delay_secs),
            )
            .delay_before_each(),
        }
    }

    /// Deliver one artifact into `chat`. Never fails: every problem ends in
    /// a fallback link or a failure notice.
    pub async fn deliver(&self, chat: ChatId, artifact: &Artifact) -> DeliveryOutcome {
        let name = artifact.file_name();

        let token = match self.upload(artifact).await {
            Ok(token) => token,
            Err(e) => {
                log::warn!("[{}] primary upload gave up: {}", name, e);
                return self.fall_back(chat, artifact, e).await;
            }
        };
        log::info!("[{}] uploaded, token obtained", name);

        match self.announce(chat, artifact.kind, &token, &name).await {
            Ok(()) => {
                log::info!("[{}] delivered to chat {}", name, chat);
                DeliveryOutcome::Delivered(token)
            }
            Err(e) => {
                log::warn!("[{}] announce gave up: {}", name, e);
                self.fall_back(chat, artifact, e).await
            }
        }
    }

    async fn upload(&self, artifact: &Artifact) -> Result<String> {
        let label = format!("upload {}", artifact.file_name());
        retry(&self.upload_policy, &label, AppError::is_transport, move |_| async move {
            let slot = self.uploader.request_upload_slot(artifact.kind).await?;
            let response = self.uploader.put_file(&slot, artifact.path()).await?;
            resolve_token(&slot, &response)
                .ok_or_else(|| AppError::PrimaryUpload("upload response carried no usable token".into()))
        })
        .await
        .map_err(|e| match e.source {
            err @ AppError::PrimaryUpload(_) => err,
            other => AppError::PrimaryUpload(format!("{} attempt(s): {}", e.attempts, other)),
        })
    }

    async fn announce(&self, chat: ChatId, kind: ArtifactKind, token: &str, name: &str) -> Result<()> {
        let message = OutboundMessage::attachment(AttachmentRef::new(kind, token));
        let message = &message;
        let label = format!("announce {name}");
        retry(&self.announce_policy, &label, |_| true, move |_| {
            self.chat.post(chat, message)
        })
        .await
        .map_err(|e| AppError::Announce(e.to_string()))
    }

    async fn fall_back(&self, chat: ChatId, artifact: &Artifact, reason: AppError) -> DeliveryOutcome {
        let name = artifact.file_name();

        let Some(storage) = &self.fallback else {
            log::error!("[{}] no fallback storage configured", name);
            self.notify(chat, &self.messages.fallback_unavailable).await;
            return DeliveryOutcome::Failed(reason.to_string());
        };

        log::info!("[{}] falling back to {}", name, storage.name());
        match storage.store(artifact.path()).await {
            Ok(url) => {
                log::info!("[{}] fallback stored at {}", name, url);
                self.notify(chat, &self.messages.fallback_link(&url)).await;
                DeliveryOutcome::FallbackDelivered(url)
            }
            Err(e) => {
                log::error!("[{}] fallback via {} failed: {}", name, storage.name(), e);
                self.notify(chat, &self.messages.fallback_failed).await;
                DeliveryOutcome::Failed(AppError::fallback(e).to_string())
            }
        }
    }

    /// Post a plain-text notice; a failure here is only logged.
    async fn notify(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.chat.post(chat, &OutboundMessage::text(text)).await {
            log::error!("Failed to notify chat {}: {}", chat, e);
        }
    }
}
