//! Inbound update stream types.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Chat (or dialog) identifier on the messenger side.
pub type ChatId = i64;

/// User identifier on the messenger side.
pub type UserId = i64;

/// Position in the inbound event stream.
///
/// Only ever moves forward; the value is opaque to everything except the
/// transport that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub i64);

impl Cursor {
    /// Cursor used when nothing has been persisted yet: now minus `grace`,
    /// in milliseconds since the epoch.
    pub fn cold_start(grace: Duration) -> Self {
        let grace_ms = i64::try_from(grace.as_millis()).unwrap_or(i64::MAX);
        Self(Utc::now().timestamp_millis().saturating_sub(grace_ms))
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

/// What kind of update an inbound event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A user sent a message
    MessageReceived,
    /// A user opened a dialog with the bot
    SessionStarted,
}

/// Sender of an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub user_id: UserId,
    pub is_bot: bool,
}

/// A single update from the ingress transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Stable identifier used for deduplication
    pub id: String,
    pub kind: EventKind,
    /// `None` when the update did not name a resolvable chat
    pub chat_id: Option<ChatId>,
    pub sender: Option<Sender>,
    /// Trimmed text payload (empty for session starts)
    pub text: String,
}

impl InboundEvent {
    /// Whether the event was authored by `bot_id` or by any bot account.
    pub fn is_from_bot(&self, bot_id: Option<UserId>) -> bool {
        match &self.sender {
            Some(sender) => sender.is_bot || Some(sender.user_id) == bot_id,
            None => false,
        }
    }
}

/// Result of one long-poll round trip.
#[derive(Debug, Clone, Default)]
pub struct PollBatch {
    pub events: Vec<InboundEvent>,
    /// `None` when the transport did not hand out a new position
    pub next_cursor: Option<Cursor>,
}

/// Identity of the bot account itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BotIdentity {
    pub user_id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}
