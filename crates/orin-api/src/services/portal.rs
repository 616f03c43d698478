//! Client for the internal staff portal's per-user data endpoint.

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::config::settings::PortalConfig;
use crate::utils::error::UpstreamError;

const SERVICE: &str = "portal";

#[derive(Clone)]
pub struct PortalClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl PortalClient {
    /// `None` when no portal base URL is configured.
    pub fn from_config(config: &PortalConfig) -> Result<Option<Self>> {
        let Some(base_url) = config
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
        else {
            return Ok(None);
        };

        Ok(Some(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .context("Failed to build portal HTTP client")?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        }))
    }

    /// Only simple identifiers are forwarded as a path segment.
    pub fn is_valid_data_type(data_type: &str) -> bool {
        !data_type.is_empty()
            && data_type.len() <= 64
            && data_type
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    /// `Ok(None)` when the portal has no such data for the user.
    pub async fn fetch_user_data(
        &self,
        user_id: Uuid,
        data_type: &str,
    ) -> Result<Option<Value>, UpstreamError> {
        let url = format!("{}/api/user/{}/{}", self.base_url, user_id, data_type);
        debug!("Fetching portal data {}", url);

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::from_transport(SERVICE, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(SERVICE, status.as_u16(), body));
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| UpstreamError::InvalidResponse {
                service: SERVICE,
                detail: e.to_string(),
            })
    }
}
