// src/error.rs

//! Unified error handling for the relay.
//!
//! Variants mirror the failure taxonomy of link processing: which ones abort a
//! whole link and which ones stay contained to a single artifact is decided by
//! the orchestrator, not here.

use std::fmt;

use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Metadata retrieval for a link failed (link-fatal)
    #[error("Extraction failed for {url}: {message}")]
    Extraction { url: String, message: String },

    /// Every rung of the download ladder failed (item-local)
    #[error("No downloadable format for {url}")]
    NoFormatAvailable { url: String },

    /// A single image could not be fetched (item-local)
    #[error("Image fetch failed for {url}: {message}")]
    ImageFetch { url: String, message: String },

    /// Primary transport rejected the upload or returned no token
    #[error("Primary upload failed: {0}")]
    PrimaryUpload(String),

    /// Posting the attachment message failed
    #[error("Announce failed: {0}")]
    Announce(String),

    /// Secondary storage failed as well
    #[error("Fallback storage failed: {0}")]
    Fallback(String),

    /// Polling the update stream failed
    #[error("Ingress transport error: {0}")]
    Ingress(String),

    /// Non-success response from a remote API
    #[error("API error {status} on {endpoint}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// An operation exceeded its time budget
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// AWS S3 error
    #[error("S3 error: {0}")]
    S3(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create an extraction error for a link.
    pub fn extraction(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Extraction {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create an image fetch error.
    pub fn image_fetch(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::ImageFetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create an API error from a response status and body.
    pub fn api(endpoint: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            endpoint: endpoint.into(),
            status,
            body: body.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a fallback storage error.
    pub fn fallback(message: impl fmt::Display) -> Self {
        Self::Fallback(message.to_string())
    }

    /// Whether the error stems from the network or a remote service, as
    /// opposed to a local or logic failure.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Api { .. } | Self::Timeout { .. } | Self::Io(_)
        )
    }
}
