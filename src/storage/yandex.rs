//! Yandex Disk fallback storage.
//!
//! Uploads go through the Disk REST API in four steps: ensure the target
//! folder exists, ask for an upload href, PUT the bytes there, then publish
//! the resource and read back its `public_url`.

use std::path::Path;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::storage::{FallbackStorage, remote_file_name};
use crate::utils::http::check_status;

/// Production endpoint of the Disk REST API.
pub const DEFAULT_API_BASE: &str = "https://cloud-api.yandex.net";

#[derive(Debug, Deserialize)]
struct UploadLink {
    href: String,
}

#[derive(Debug, Deserialize)]
struct ResourceMeta {
    #[serde(default)]
    public_url: Option<String>,
}

/// Fallback storage backed by a Yandex Disk folder.
#[derive(Clone)]
pub struct YandexDiskStorage {
    client: Client,
    api_base: String,
    token: String,
    folder: String,
}

impl YandexDiskStorage {
    pub fn new(client: Client, token: impl Into<String>, folder: impl Into<String>) -> Self {
        Self::with_api_base(client, DEFAULT_API_BASE, token, folder)
    }

    /// Point the store at a different API host.
    pub fn with_api_base(
        client: Client,
        api_base: impl Into<String>,
        token: impl Into<String>,
        folder: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            folder: folder.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/disk/{}", self.api_base, path)
    }

    fn auth(&self) -> String {
        format!("OAuth {}", self.token)
    }

    fn remote_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.folder.trim_end_matches('/'), file_name)
    }

    /// Create the target folder; an existing folder is fine.
    async fn ensure_folder(&self) -> Result<()> {
        let response = self
            .client
            .put(self.endpoint("resources"))
            .header("Authorization", self.auth())
            .query(&[("path", self.folder.as_str())])
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        check_status("disk/resources", response).await?;
        log::info!("Created Yandex Disk folder {}", self.folder);
        Ok(())
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let response = self
            .client
            .get(self.endpoint("resources/upload"))
            .header("Authorization", self.auth())
            .query(&[("path", remote), ("overwrite", "true")])
            .send()
            .await?;
        let link: UploadLink = check_status("disk/resources/upload", response)
            .await?
            .json()
            .await?;

        let file = tokio::fs::File::open(local).await?;
        let response = self.client.put(&link.href).body(file).send().await?;
        check_status("disk upload href", response).await?;
        Ok(())
    }

    async fn publish(&self, remote: &str) -> Result<String> {
        let response = self
            .client
            .put(self.endpoint("resources/publish"))
            .header("Authorization", self.auth())
            .query(&[("path", remote)])
            .send()
            .await?;
        check_status("disk/resources/publish", response).await?;

        let response = self
            .client
            .get(self.endpoint("resources"))
            .header("Authorization", self.auth())
            .query(&[("path", remote), ("fields", "public_url")])
            .send()
            .await?;
        let meta: ResourceMeta = check_status("disk/resources", response).await?.json().await?;
        meta.public_url
            .ok_or_else(|| AppError::fallback(format!("{remote} was published without a public_url")))
    }
}

#[async_trait]
impl FallbackStorage for YandexDiskStorage {
    fn name(&self) -> &'static str {
        "yandex-disk"
    }

    async fn store(&self, path: &Path) -> Result<String> {
        let file_name = remote_file_name(path)?;
        let remote = self.remote_path(&file_name);

        self.ensure_folder().await?;
        self.upload(path, &remote).await?;
        let url = self.publish(&remote).await?;

        log::info!("Stored {} on Yandex Disk at {}", path.display(), url);
        Ok(url)
    }
}
