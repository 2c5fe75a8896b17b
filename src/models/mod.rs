// src/models/mod.rs

//! Domain models for the relay.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod event;
mod media;
mod message;

// Re-export all public types
pub use config::{
    AcquisitionConfig, Config, DeliveryConfig, FallbackConfig, FallbackProvider, IngestConfig,
    LoggingConfig, MaxConfig, Messages,
};
pub use event::{BotIdentity, ChatId, Cursor, EventKind, InboundEvent, PollBatch, Sender, UserId};
pub use media::{Artifact, ArtifactKind, MediaDescriptor, MediaKind, RawMetadata, Thumbnail};
pub use message::{AttachmentPayload, AttachmentRef, DeliveryOutcome, OutboundMessage, TextFormat};
