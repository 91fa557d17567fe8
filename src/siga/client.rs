//! HTTP client for the SIGA REST backend.
//!
//! Plain GETs with a Bearer token when the durable store holds one. The
//! token is read per request so a fresh login is picked up without restart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use super::{
    parse_list, IncompleteRecord, NotificationSource, SelectionTestRecord, TrackingRecord,
    TrackingStats,
};
use crate::error::NotifyError;
use crate::storage::{read_auth_token, KeyValueStore};
use crate::types::{Config, EndpointsConfig};

pub struct SigaClient {
    client: reqwest::Client,
    base_url: Url,
    endpoints: EndpointsConfig,
    store: Arc<dyn KeyValueStore>,
    timeout_secs: u64,
}

impl SigaClient {
    pub fn new(config: &Config, store: Arc<dyn KeyValueStore>) -> Result<Self, NotifyError> {
        let base_url = normalize_base_url(&config.api_base_url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| NotifyError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            endpoints: config.endpoints.clone(),
            store,
            timeout_secs: config.request_timeout_secs,
        })
    }

    /// Resolve an endpoint path against the base URL.
    pub fn endpoint_url(&self, path: &str) -> Result<Url, NotifyError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| NotifyError::Configuration(format!("Invalid endpoint '{}': {}", path, e)))
    }

    async fn get_json(&self, path: &str) -> Result<Value, NotifyError> {
        let url = self.endpoint_url(path)?;
        let mut request = self.client.get(url).header("Accept", "application/json");
        if let Some(token) = read_auth_token(self.store.as_ref()) {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(|e| self.map_request_error(e))?;

        if !resp.status().is_success() {
            return Err(NotifyError::HttpStatus {
                status: resp.status().as_u16(),
                endpoint: path.to_string(),
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| NotifyError::Parse(format!("Failed to parse '{}' response: {}", path, e)))
    }

    fn map_request_error(&self, err: reqwest::Error) -> NotifyError {
        if err.is_timeout() {
            NotifyError::Timeout(self.timeout_secs)
        } else {
            NotifyError::from(err)
        }
    }
}

#[async_trait]
impl NotificationSource for SigaClient {
    async fn fetch_tracking(&self) -> Result<Vec<TrackingRecord>, NotifyError> {
        parse_list(self.get_json(&self.endpoints.tracking).await?)
    }

    async fn fetch_stats(&self) -> Result<TrackingStats, NotifyError> {
        let payload = self.get_json(&self.endpoints.stats).await?;
        Ok(TrackingStats::from_value(&payload))
    }

    async fn fetch_incomplete(&self) -> Result<Vec<IncompleteRecord>, NotifyError> {
        parse_list(self.get_json(&self.endpoints.incomplete).await?)
    }

    async fn fetch_selection_tests(&self) -> Result<Vec<SelectionTestRecord>, NotifyError> {
        parse_list(self.get_json(&self.endpoints.selection_tests).await?)
    }
}

/// Ensure the base URL ends with '/' so relative endpoint paths append to it.
fn normalize_base_url(raw: &str) -> Result<Url, NotifyError> {
    let mut with_slash = raw.trim().to_string();
    if !with_slash.ends_with('/') {
        with_slash.push('/');
    }
    Url::parse(&with_slash)
        .map_err(|e| NotifyError::Configuration(format!("Invalid apiBaseUrl '{}': {}", raw, e)))
}
