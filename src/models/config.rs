//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// MAX Bot API connection settings
    #[serde(default)]
    pub max: MaxConfig,

    /// Update polling and cursor persistence
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Extraction and download behaviour
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Upload/announce retry behaviour
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Secondary storage used when primary delivery fails
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// User-visible texts
    #[serde(default)]
    pub messages: Messages,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.max.token.trim().is_empty() {
            return Err(AppError::validation("max.token is empty"));
        }
        if url::Url::parse(&self.max.api_base).is_err() {
            return Err(AppError::validation("max.api_base is not a valid URL"));
        }
        if self.ingest.poll_timeout_secs == 0 {
            return Err(AppError::validation("ingest.poll_timeout_secs must be > 0"));
        }
        if self.max.request_timeout_secs <= self.ingest.poll_timeout_secs {
            return Err(AppError::validation(
                "max.request_timeout_secs must exceed ingest.poll_timeout_secs",
            ));
        }
        if self.acquisition.image_timeout_secs == 0 {
            return Err(AppError::validation(
                "acquisition.image_timeout_secs must be > 0",
            ));
        }
        if self.acquisition.image_concurrency == 0 {
            return Err(AppError::validation(
                "acquisition.image_concurrency must be > 0",
            ));
        }
        if self.delivery.upload_attempts == 0 || self.delivery.announce_attempts == 0 {
            return Err(AppError::validation("delivery attempts must be > 0"));
        }
        if self.delivery.description_limit == 0 {
            return Err(AppError::validation("delivery.description_limit must be > 0"));
        }
        match self.fallback.provider {
            FallbackProvider::Yandex if self.fallback.yandex_token.trim().is_empty() => {
                return Err(AppError::validation(
                    "fallback.provider = \"yandex\" requires fallback.yandex_token",
                ));
            }
            FallbackProvider::S3 if self.fallback.s3_bucket.trim().is_empty() => {
                return Err(AppError::validation(
                    "fallback.provider = \"s3\" requires fallback.s3_bucket",
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

/// MAX Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxConfig {
    /// API base URL
    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    /// Bot access token (usually supplied via `MAX_BOT_TOKEN`)
    #[serde(default)]
    pub token: String,

    /// Timeout for ordinary API calls; must exceed the long-poll timeout
    #[serde(default = "defaults::request_timeout")]
    pub request_timeout_secs: u64,

    /// Timeout for a single file upload to the CDN
    #[serde(default = "defaults::upload_timeout")]
    pub upload_timeout_secs: u64,
}

impl Default for MaxConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::api_base(),
            token: String::new(),
            request_timeout_secs: defaults::request_timeout(),
            upload_timeout_secs: defaults::upload_timeout(),
        }
    }
}

/// Update polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// File holding the last acknowledged cursor
    #[serde(default = "defaults::cursor_file")]
    pub cursor_file: String,

    /// Long-poll wait in seconds
    #[serde(default = "defaults::poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Fixed delay after a failed poll
    #[serde(default = "defaults::error_backoff")]
    pub error_backoff_secs: u64,

    /// How far back a cold start reaches
    #[serde(default = "defaults::cold_start_grace")]
    pub cold_start_grace_secs: u64,

    /// Process different chats concurrently (same chat stays serialized)
    #[serde(default)]
    pub concurrent_chats: bool,
}

impl IngestConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            cursor_file: defaults::cursor_file(),
            poll_timeout_secs: defaults::poll_timeout(),
            error_backoff_secs: defaults::error_backoff(),
            cold_start_grace_secs: defaults::cold_start_grace(),
            concurrent_chats: false,
        }
    }
}

/// Extraction and download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Path or name of the yt-dlp executable
    #[serde(default = "defaults::ytdlp_binary")]
    pub ytdlp_binary: String,

    /// Timeout for metadata extraction
    #[serde(default = "defaults::extract_timeout")]
    pub extract_timeout_secs: u64,

    /// Timeout for a single download strategy
    #[serde(default = "defaults::download_timeout")]
    pub download_timeout_secs: u64,

    /// Timeout for fetching a single image
    #[serde(default = "defaults::image_timeout")]
    pub image_timeout_secs: u64,

    /// Concurrent image fetches within one gallery
    #[serde(default = "defaults::image_concurrency")]
    pub image_concurrency: usize,

    /// User-Agent header for image requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Parent directory for per-link scratch space (system temp if unset)
    #[serde(default)]
    pub work_dir: Option<String>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            ytdlp_binary: defaults::ytdlp_binary(),
            extract_timeout_secs: defaults::extract_timeout(),
            download_timeout_secs: defaults::download_timeout(),
            image_timeout_secs: defaults::image_timeout(),
            image_concurrency: defaults::image_concurrency(),
            user_agent: defaults::user_agent(),
            work_dir: None,
        }
    }
}

/// Delivery retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Upload attempts before falling back
    #[serde(default = "defaults::upload_attempts")]
    pub upload_attempts: u32,

    /// Delay after the first failed upload; doubles each attempt
    #[serde(default = "defaults::upload_base_delay")]
    pub upload_base_delay_ms: u64,

    /// Announce attempts before falling back
    #[serde(default = "defaults::announce_attempts")]
    pub announce_attempts: u32,

    /// Delay before the first announce; doubles each attempt
    #[serde(default = "defaults::announce_base_delay")]
    pub announce_base_delay_secs: u64,

    /// Pause after a successful delivery before the next artifact
    #[serde(default = "defaults::inter_artifact_delay")]
    pub inter_artifact_delay_ms: u64,

    /// Maximum description length in characters
    #[serde(default = "defaults::description_limit")]
    pub description_limit: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            upload_attempts: defaults::upload_attempts(),
            upload_base_delay_ms: defaults::upload_base_delay(),
            announce_attempts: defaults::announce_attempts(),
            announce_base_delay_secs: defaults::announce_base_delay(),
            inter_artifact_delay_ms: defaults::inter_artifact_delay(),
            description_limit: defaults::description_limit(),
        }
    }
}

/// Which secondary storage backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FallbackProvider {
    #[default]
    None,
    Yandex,
    S3,
}

/// Secondary storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default)]
    pub provider: FallbackProvider,

    /// Yandex Disk OAuth token (usually supplied via `YANDEX_DISK_TOKEN`)
    #[serde(default)]
    pub yandex_token: String,

    /// Remote folder for uploaded files
    #[serde(default = "defaults::yandex_dir")]
    pub yandex_dir: String,

    /// S3 bucket name
    #[serde(default)]
    pub s3_bucket: String,

    /// S3 key prefix
    #[serde(default = "defaults::s3_prefix")]
    pub s3_prefix: String,

    /// Lifetime of presigned download links
    #[serde(default = "defaults::s3_link_ttl")]
    pub s3_link_ttl_secs: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            provider: FallbackProvider::None,
            yandex_token: String::new(),
            yandex_dir: defaults::yandex_dir(),
            s3_bucket: String::new(),
            s3_prefix: defaults::s3_prefix(),
            s3_link_ttl_secs: defaults::s3_link_ttl(),
        }
    }
}

/// User-visible message texts.
///
/// `{url}` and `{donate_url}` placeholders are substituted at send time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Messages {
    #[serde(default = "defaults::msg_welcome")]
    pub welcome: String,
    #[serde(default = "defaults::msg_usage_hint")]
    pub usage_hint: String,
    #[serde(default = "defaults::msg_processing_failed")]
    pub processing_failed: String,
    #[serde(default = "defaults::msg_no_media")]
    pub no_media: String,
    #[serde(default = "defaults::msg_fallback_link")]
    pub fallback_link: String,
    #[serde(default = "defaults::msg_fallback_unavailable")]
    pub fallback_unavailable: String,
    #[serde(default = "defaults::msg_fallback_failed")]
    pub fallback_failed: String,
    #[serde(default = "defaults::msg_description_failed")]
    pub description_failed: String,
    #[serde(default = "defaults::msg_done")]
    pub done: String,
    #[serde(default)]
    pub donate_url: Option<String>,
}

impl Messages {
    /// Text pointing the user at the fallback copy of a file.
    pub fn fallback_link(&self, url: &str) -> String {
        self.fallback_link.replace("{url}", url)
    }

    /// Completion notice. Without a donation link the paragraph holding the
    /// call to action is dropped.
    pub fn done(&self) -> String {
        match self.donate_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => self.done.replace("{donate_url}", url),
            None => self
                .done
                .split("\n\n")
                .filter(|paragraph| !paragraph.contains("{donate_url}"))
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            welcome: defaults::msg_welcome(),
            usage_hint: defaults::msg_usage_hint(),
            processing_failed: defaults::msg_processing_failed(),
            no_media: defaults::msg_no_media(),
            fallback_link: defaults::msg_fallback_link(),
            fallback_unavailable: defaults::msg_fallback_unavailable(),
            fallback_failed: defaults::msg_fallback_failed(),
            description_failed: defaults::msg_description_failed(),
            done: defaults::msg_done(),
            donate_url: None,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log filter when `RUST_LOG` is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    // MAX defaults
    pub fn api_base() -> String {
        "https://platform-api.max.ru".into()
    }
    pub fn request_timeout() -> u64 {
        45
    }
    pub fn upload_timeout() -> u64 {
        60
    }

    // Ingest defaults
    pub fn cursor_file() -> String {
        "state/cursor.json".into()
    }
    pub fn poll_timeout() -> u64 {
        30
    }
    pub fn error_backoff() -> u64 {
        5
    }
    pub fn cold_start_grace() -> u64 {
        60
    }

    // Acquisition defaults
    pub fn ytdlp_binary() -> String {
        "yt-dlp".into()
    }
    pub fn extract_timeout() -> u64 {
        120
    }
    pub fn download_timeout() -> u64 {
        600
    }
    pub fn image_timeout() -> u64 {
        15
    }
    pub fn image_concurrency() -> usize {
        4
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; media-relay/0.1)".into()
    }

    // Delivery defaults
    pub fn upload_attempts() -> u32 {
        2
    }
    pub fn upload_base_delay() -> u64 {
        1000
    }
    pub fn announce_attempts() -> u32 {
        5
    }
    pub fn announce_base_delay() -> u64 {
        2
    }
    pub fn inter_artifact_delay() -> u64 {
        1000
    }
    pub fn description_limit() -> usize {
        4000
    }

    // Fallback defaults
    pub fn yandex_dir() -> String {
        "/bots_temp".into()
    }
    pub fn s3_prefix() -> String {
        "media-relay".into()
    }
    pub fn s3_link_ttl() -> u64 {
        7 * 24 * 60 * 60
    }

    // Message defaults
    pub fn msg_welcome() -> String {
        "Hi! I fetch videos, images and descriptions from posts.\n\
         Send me a link to a post and I will send the content back."
            .into()
    }
    pub fn msg_usage_hint() -> String {
        "Send a link to process, or /start to begin.".into()
    }
    pub fn msg_processing_failed() -> String {
        "Something went wrong while processing the link. Try another one.".into()
    }
    pub fn msg_no_media() -> String {
        "Could not find any media behind your link.".into()
    }
    pub fn msg_fallback_link() -> String {
        "Could not send the file directly, download it here:\n{url}".into()
    }
    pub fn msg_fallback_unavailable() -> String {
        "Could not send the file.".into()
    }
    pub fn msg_fallback_failed() -> String {
        "An error occurred while processing the file.".into()
    }
    pub fn msg_description_failed() -> String {
        "Could not send the post description.".into()
    }
    pub fn msg_done() -> String {
        "✅ Done!\n\nIf the bot helped you, support the project:\n{donate_url}".into()
    }

    // Logging defaults
    pub fn log_level() -> String {
        "info".into()
    }
}
