// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::{AcquisitionConfig, MaxConfig};

/// Create the client used for fetching images and other direct media.
pub fn create_media_client(config: &AcquisitionConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.image_timeout_secs))
        .build()?;
    Ok(client)
}

/// Create the client used for MAX API calls.
///
/// The timeout must outlast the long-poll wait so the server answers before
/// the client gives up.
pub fn create_api_client(config: &MaxConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("media-relay/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?;
    Ok(client)
}

/// Turn a non-success response into an [`AppError::Api`], passing successful
/// responses through.
pub async fn check_status(endpoint: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::api(endpoint, status.as_u16(), body))
}
