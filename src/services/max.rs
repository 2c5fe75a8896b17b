// src/services/max.rs

//! MAX Bot API client.
//!
//! Covers the handful of endpoints the relay needs: bot identity, long-poll
//! updates, outgoing messages, chat actions and the two-step attachment
//! upload (slot request, then multipart transfer to the slot URL).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::{
    ArtifactKind, BotIdentity, ChatId, Cursor, EventKind, InboundEvent, MaxConfig, OutboundMessage,
    PollBatch, Sender, UserId,
};
use crate::services::{ChatTransport, UploadSlot, UploadTransport};
use crate::utils::http::{check_status, create_api_client};

// ---- wire types ----

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    #[serde(default)]
    updates: Vec<serde_json::Value>,
    #[serde(default)]
    marker: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "update_type", rename_all = "snake_case")]
enum RawUpdate {
    MessageCreated {
        message: RawMessage,
        #[serde(default)]
        timestamp: i64,
    },
    BotStarted {
        #[serde(default)]
        chat_id: Option<ChatId>,
        #[serde(default)]
        user: Option<RawUser>,
        #[serde(default)]
        timestamp: i64,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    #[serde(default)]
    sender: Option<RawUser>,
    #[serde(default)]
    recipient: RawRecipient,
    #[serde(default)]
    body: RawBody,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    user_id: UserId,
    #[serde(default)]
    is_bot: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawRecipient {
    #[serde(default)]
    chat_id: Option<ChatId>,
    #[serde(default)]
    user_id: Option<UserId>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBody {
    #[serde(default)]
    mid: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadSlotResponse {
    url: String,
    #[serde(default)]
    token: Option<String>,
}

impl RawUpdate {
    fn into_event(self) -> Option<InboundEvent> {
        match self {
            RawUpdate::MessageCreated { message, timestamp } => {
                let chat_id = message.recipient.chat_id.or(message.recipient.user_id);
                let id = message
                    .body
                    .mid
                    .unwrap_or_else(|| format!("message:{}:{}", chat_id.unwrap_or_default(), timestamp));
                Some(InboundEvent {
                    id,
                    kind: EventKind::MessageReceived,
                    chat_id,
                    sender: message.sender.map(RawUser::into_sender),
                    text: message.body.text.unwrap_or_default().trim().to_string(),
                })
            }
            RawUpdate::BotStarted {
                chat_id,
                user,
                timestamp,
            } => Some(InboundEvent {
                id: format!("bot_started:{}:{}", chat_id.unwrap_or_default(), timestamp),
                kind: EventKind::SessionStarted,
                chat_id,
                sender: user.map(RawUser::into_sender),
                text: String::new(),
            }),
            RawUpdate::Other => None,
        }
    }
}

impl RawUser {
    fn into_sender(self) -> Sender {
        Sender {
            user_id: self.user_id,
            is_bot: self.is_bot,
        }
    }
}

/// Turn a raw `/updates` body into a batch, skipping update types the relay
/// does not handle and entries that fail to parse.
fn parse_updates(response: UpdatesResponse) -> PollBatch {
    let events = response
        .updates
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<RawUpdate>(value) {
            Ok(update) => update.into_event(),
            Err(e) => {
                log::warn!("Skipping malformed update: {}", e);
                None
            }
        })
        .collect();
    PollBatch {
        events,
        next_cursor: response.marker.map(Cursor),
    }
}

// ---- client ----

/// Client for the MAX Bot API.
#[derive(Clone)]
pub struct MaxClient {
    client: Client,
    api_base: String,
    token: String,
    upload_timeout: Duration,
}

impl MaxClient {
    /// Create a client from the `[max]` configuration section.
    pub fn new(config: &MaxConfig) -> Result<Self> {
        let client = create_api_client(config)?;
        Ok(Self::with_client(client, config))
    }

    /// Create a client around an existing HTTP client.
    pub fn with_client(client: Client, config: &MaxConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            upload_timeout: Duration::from_secs(config.upload_timeout_secs),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .header("Authorization", &self.token)
    }

    fn post_to(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .header("Authorization", &self.token)
    }
}

#[async_trait]
impl ChatTransport for MaxClient {
    async fn me(&self) -> Result<BotIdentity> {
        let response = self.get("/me").send().await?;
        Ok(check_status("/me", response).await?.json().await?)
    }

    async fn poll(&self, cursor: Option<Cursor>, timeout: Duration) -> Result<PollBatch> {
        let mut request = self
            .get("/updates")
            .query(&[("timeout", timeout.as_secs())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("marker", cursor.value())]);
        }

        let fetch = async {
            let response = request.send().await?;
            let body: UpdatesResponse = check_status("/updates", response).await?.json().await?;
            Ok::<_, AppError>(body)
        };
        let body = fetch.await.map_err(|e| AppError::Ingress(e.to_string()))?;
        Ok(parse_updates(body))
    }

    async fn post(&self, chat: ChatId, message: &OutboundMessage) -> Result<()> {
        let response = self
            .post_to("/messages")
            .query(&[("chat_id", chat)])
            .json(message)
            .send()
            .await?;
        check_status("/messages", response).await?;
        Ok(())
    }

    async fn set_typing(&self, chat: ChatId) -> Result<()> {
        let endpoint = format!("/chats/{chat}/actions");
        let response = self
            .post_to(&endpoint)
            .json(&serde_json::json!({"action": "typing_on"}))
            .send()
            .await?;
        check_status(&endpoint, response).await?;
        Ok(())
    }
}

#[async_trait]
impl UploadTransport for MaxClient {
    async fn request_upload_slot(&self, kind: ArtifactKind) -> Result<UploadSlot> {
        let response = self
            .post_to("/uploads")
            .query(&[("type", kind.as_str())])
            .send()
            .await?;
        let slot: UploadSlotResponse = check_status("/uploads", response).await?.json().await?;
        Ok(UploadSlot {
            kind,
            url: slot.url,
            token: slot.token,
        })
    }

    async fn put_file(&self, slot: &UploadSlot, path: &Path) -> Result<serde_json::Value> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        log::debug!(
            "Uploading {} ({} bytes) as {}",
            file_name,
            length,
            slot.kind.as_str()
        );

        let part = Part::stream_with_length(file, length)
            .file_name(file_name)
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("data", part);

        let response = self
            .client
            .post(&slot.url)
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await?;
        let body = check_status("upload slot", response).await?.text().await?;
        Ok(serde_json::from_str(&body).unwrap_or(serde_json::Value::Null))
    }
}
