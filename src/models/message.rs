//! Outbound message and delivery result types.

use serde::Serialize;

use crate::models::ArtifactKind;

/// Rendering hint for message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    Html,
}

/// Attachment reference built from a delivery token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentRef {
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub payload: AttachmentPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentPayload {
    pub token: String,
}

impl AttachmentRef {
    pub fn new(kind: ArtifactKind, token: impl Into<String>) -> Self {
        Self {
            kind,
            payload: AttachmentPayload {
                token: token.into(),
            },
        }
    }
}

/// A message to post into a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<TextFormat>,
}

impl OutboundMessage {
    /// Plain-text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
            format: None,
        }
    }

    /// Message carrying a single attachment and no text.
    pub fn attachment(attachment: AttachmentRef) -> Self {
        Self {
            text: String::new(),
            attachments: vec![attachment],
            format: None,
        }
    }

    pub fn with_format(mut self, format: TextFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// Terminal result of delivering one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Posted through the primary transport
    Delivered(String),
    /// Stored in secondary storage; the link was posted instead
    FallbackDelivered(String),
    /// Nothing reached the user except a failure notice
    Failed(String),
}
