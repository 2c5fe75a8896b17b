// src/pipeline/acquire.rs

//! Acquisition engine.
//!
//! Turns a classified [`MediaDescriptor`] into local files. Videos go through
//! the download ladder (see [`Strategy::LADDER`]); images are fetched directly
//! over HTTP with a bounded timeout. Every failure here is item-local: it is
//! logged and the item is skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use reqwest::Client;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{AcquisitionConfig, Artifact, ArtifactKind, MediaDescriptor, MediaKind};
use crate::services::{FetchRequest, MediaExtractor, Strategy};
use crate::utils::http::create_media_client;
use crate::utils::{url_digest, url_extension};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Summary of one acquisition pass.
#[derive(Debug, Default)]
pub struct AcquisitionOutcome {
    /// Materialized files, in sub-item order
    pub artifacts: Vec<Artifact>,
    pub item_total: usize,
    pub item_failures: usize,
}

/// Downloads media for classified descriptors.
#[derive(Clone)]
pub struct AcquisitionEngine {
    extractor: Arc<dyn MediaExtractor>,
    client: Client,
    image_concurrency: usize,
}

impl AcquisitionEngine {
    pub fn new(extractor: Arc<dyn MediaExtractor>, config: &AcquisitionConfig) -> Result<Self> {
        let client = create_media_client(config)?;
        Ok(Self::with_client(extractor, client, config.image_concurrency))
    }

    pub fn with_client(
        extractor: Arc<dyn MediaExtractor>,
        client: Client,
        image_concurrency: usize,
    ) -> Self {
        Self {
            extractor,
            client,
            image_concurrency: image_concurrency.max(1),
        }
    }

    /// Acquire everything `descriptor` points at into `dir`.
    pub async fn acquire(&self, descriptor: &MediaDescriptor, dir: &Path) -> AcquisitionOutcome {
        let mut outcome = AcquisitionOutcome::default();
        match descriptor.kind {
            MediaKind::Video | MediaKind::Image => {
                outcome.item_total = 1;
                let result = if descriptor.kind == MediaKind::Video {
                    self.acquire_video(descriptor, dir).await
                } else {
                    self.acquire_image(descriptor, dir).await
                };
                match result {
                    Ok(artifact) => outcome.artifacts.push(artifact),
                    Err(e) => {
                        outcome.item_failures = 1;
                        log::warn!("Skipping item: {}", e);
                    }
                }
            }
            MediaKind::Gallery => {
                outcome.item_total = descriptor.items.len();

                let mut artifacts = Vec::new();
                for item in descriptor.items.iter().filter(|i| i.kind == MediaKind::Video) {
                    match self.acquire_video(item, dir).await {
                        Ok(artifact) => artifacts.push(artifact),
                        Err(e) => log::warn!("Skipping gallery item {:?}: {}", item.position, e),
                    }
                }
                artifacts.extend(self.acquire_gallery_images(descriptor, dir).await);
                artifacts.sort_by_key(|a| a.descriptor.position);

                outcome.item_failures = outcome.item_total - artifacts.len();
                outcome.artifacts = artifacts;
            }
            MediaKind::None => {}
        }

        log::info!(
            "Acquired {}/{} item(s)",
            outcome.artifacts.len(),
            outcome.item_total
        );
        outcome
    }

    /// Walk the download ladder until a rung yields a non-empty file.
    ///
    /// Candidate URLs are tried in order; each one gets the full ladder.
    pub async fn acquire_video(&self, descriptor: &MediaDescriptor, dir: &Path) -> Result<Artifact> {
        let stem = descriptor.file_stem("video");
        let can_merge = self.extractor.can_merge_streams();

        for url in &descriptor.urls {
            for strategy in Strategy::LADDER {
                if strategy.requires_merge() && !can_merge {
                    log::debug!("Skipping {:?} for {}: no merge capability", strategy, url);
                    continue;
                }

                let request = FetchRequest {
                    url: url.clone(),
                    strategy,
                    dest_dir: dir.to_path_buf(),
                    stem: stem.clone(),
                    playlist_item: descriptor.position,
                };
                match self.try_rung(&request).await {
                    Ok(path) => {
                        log::info!("Downloaded {} via {:?} -> {}", url, strategy, path.display());
                        return Ok(Artifact::new(path, ArtifactKind::Video, descriptor.clone()));
                    }
                    Err(e) => log::warn!("Rung {:?} failed for {}: {}", strategy, url, e),
                }
            }
        }

        Err(AppError::NoFormatAvailable {
            url: descriptor.primary_url().unwrap_or_default().to_string(),
        })
    }

    async fn try_rung(&self, request: &FetchRequest) -> Result<PathBuf> {
        let path = self.extractor.fetch(request).await?;
        let len = tokio::fs::metadata(&path)
            .await
            .map_err(|e| AppError::extraction(&request.url, format!("missing output file: {e}")))?
            .len();
        if len == 0 {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(AppError::extraction(&request.url, "downloaded file is empty"));
        }
        Ok(path)
    }

    /// Single-attempt fetch of an image descriptor's primary URL.
    pub async fn acquire_image(&self, descriptor: &MediaDescriptor, dir: &Path) -> Result<Artifact> {
        let url = descriptor
            .primary_url()
            .ok_or_else(|| AppError::image_fetch("", "descriptor has no URL"))?;
        let ext = url_extension(url)
            .filter(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or_else(|| "jpg".to_string());
        let path = dir.join(format!("{}.{}", descriptor.file_stem(&url_digest(url)), ext));

        self.download_to(url, &path)
            .await
            .map_err(|e| AppError::image_fetch(url, e))?;
        Ok(Artifact::new(path, ArtifactKind::Image, descriptor.clone()))
    }

    /// Fetch every image sub-item of a gallery, keeping sub-item order.
    /// Failed items are logged and left out.
    pub async fn acquire_gallery_images(&self, descriptor: &MediaDescriptor, dir: &Path) -> Vec<Artifact> {
        let fetches: Vec<_> = descriptor
            .items
            .iter()
            .filter(|i| i.kind == MediaKind::Image)
            .map(|item| self.acquire_image(item, dir))
            .collect();

        let mut results = stream::iter(fetches).buffered(self.image_concurrency);

        let mut artifacts = Vec::new();
        while let Some(result) = results.next().await {
            match result {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => log::warn!("Skipping gallery image: {}", e),
            }
        }
        artifacts
    }

    async fn download_to(&self, url: &str, path: &Path) -> Result<()> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;

        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0usize;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;

        if written == 0 {
            drop(file);
            let _ = tokio::fs::remove_file(path).await;
            return Err(AppError::validation("empty response body"));
        }
        Ok(())
    }
}
