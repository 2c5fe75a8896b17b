// src/config.rs

//! Configuration loading and component assembly.
//!
//! Secrets usually arrive through the environment rather than the TOML file;
//! [`apply_env_overrides`] layers them on top of whatever the file said.

use std::path::Path;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{Config, FallbackProvider};
use crate::pipeline::{
    AcquisitionEngine, DeliveryEngine, LinkProcessor, ProcessOptions, RelayContext, RunOptions,
    UpdateIngestor,
};
use crate::services::{ChatTransport, MaxClient, MediaExtractor, UploadTransport, YtDlpExtractor};
use crate::storage::{FallbackStorage, FileCursorStore, YandexDiskStorage};

/// Load configuration from a TOML file and apply environment overrides.
///
/// A missing file falls back to defaults; a file that exists but does not
/// parse is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        Config::load(path)?
    } else {
        log::warn!("Config file {} not found; using defaults", path.display());
        Config::default()
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Overlay secrets from `lookup` (normally the process environment).
///
/// A Yandex token turns the Yandex provider on when no provider was chosen.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(token) = get("MAX_BOT_TOKEN") {
        config.max.token = token;
    }
    if let Some(token) = get("YANDEX_DISK_TOKEN") {
        config.fallback.yandex_token = token;
        if config.fallback.provider == FallbackProvider::None {
            config.fallback.provider = FallbackProvider::Yandex;
        }
    }
    if let Some(url) = get("DONATE_URL") {
        config.messages.donate_url = Some(url);
    }
    if let Some(bucket) = get("S3_BUCKET") {
        config.fallback.s3_bucket = bucket;
    }
    if let Some(prefix) = get("S3_PREFIX") {
        config.fallback.s3_prefix = prefix;
    }
}

/// Build the configured secondary storage, if any.
pub async fn build_fallback(config: &Config) -> Result<Option<Arc<dyn FallbackStorage>>> {
    match config.fallback.provider {
        FallbackProvider::None => Ok(None),
        FallbackProvider::Yandex => {
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(config.max.upload_timeout_secs))
                .build()?;
            Ok(Some(Arc::new(YandexDiskStorage::new(
                client,
                &config.fallback.yandex_token,
                &config.fallback.yandex_dir,
            ))))
        }
        #[cfg(feature = "s3")]
        FallbackProvider::S3 => {
            let storage = crate::storage::S3Storage::from_config(&config.fallback).await?;
            Ok(Some(Arc::new(storage)))
        }
        #[cfg(not(feature = "s3"))]
        FallbackProvider::S3 => Err(AppError::config(
            "fallback.provider = \"s3\" needs a build with the `s3` feature",
        )),
    }
}

/// Everything a running relay needs, wired from configuration.
pub struct Relay {
    pub client: Arc<MaxClient>,
    pub processor: LinkProcessor,
    pub cursor_store: Arc<FileCursorStore>,
    pub fallback: Option<Arc<dyn FallbackStorage>>,
}

impl Relay {
    /// Wire the MAX client, yt-dlp extractor, fallback storage and pipeline
    /// engines together.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let client = Arc::new(MaxClient::new(&config.max)?);
        let chat: Arc<dyn ChatTransport> = client.clone();
        let uploader: Arc<dyn UploadTransport> = client.clone();

        let ytdlp = YtDlpExtractor::new(&config.acquisition);
        if !ytdlp.is_installed() {
            return Err(AppError::config(format!(
                "extraction binary `{}` not found",
                config.acquisition.ytdlp_binary
            )));
        }
        let extractor: Arc<dyn MediaExtractor> = Arc::new(ytdlp);

        let fallback = build_fallback(config).await?;
        let messages = Arc::new(config.messages.clone());

        let acquisition = AcquisitionEngine::new(extractor.clone(), &config.acquisition)?;
        let delivery = DeliveryEngine::new(
            chat.clone(),
            uploader,
            fallback.clone(),
            messages.clone(),
            &config.delivery,
        );
        let processor = LinkProcessor::new(
            chat,
            extractor,
            acquisition,
            delivery,
            messages,
            ProcessOptions::from_config(config),
        );

        Ok(Self {
            client,
            processor,
            cursor_store: Arc::new(FileCursorStore::new(&config.ingest.cursor_file)),
            fallback,
        })
    }

    /// Build the shared context and the ingestor for the polling loop.
    /// Resolves the bot's own identity so its messages can be ignored.
    pub async fn into_loop(self, config: &Config) -> (Arc<RelayContext>, UpdateIngestor, RunOptions) {
        let bot_id = match self.client.me().await {
            Ok(me) => {
                log::info!("Bot identity: {} ({:?})", me.user_id, me.name);
                Some(me.user_id)
            }
            Err(e) => {
                log::error!("Failed to get bot info: {}", e);
                None
            }
        };

        let chat: Arc<dyn ChatTransport> = self.client;
        let ingestor = UpdateIngestor::new(chat.clone(), self.cursor_store, &config.ingest);
        let ctx = Arc::new(RelayContext::new(
            chat,
            self.processor,
            Arc::new(config.messages.clone()),
            bot_id,
        ));
        let options = RunOptions {
            error_backoff: config.ingest.error_backoff(),
            concurrent_chats: config.ingest.concurrent_chats,
        };
        (ctx, ingestor, options)
    }
}
