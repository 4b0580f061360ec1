use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;

use crate::config::{Config, expand_template};
use crate::ids::AppId;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {url}: {source}")]
    Transport { url: String, source: reqwest::Error },
    #[error("HTTP status error: {status} {url}")]
    HttpStatus { status: StatusCode, url: String },
    #[error("malformed body from {url}: {source}")]
    Body { url: String, source: reqwest::Error },
}

/// Remote side of the pipeline: the catalog details API and the
/// community stats API.
pub trait CatalogSource {
    async fn fetch_details(&self, id: &AppId) -> Result<Value, FetchError>;

    /// `Ok(None)` when no stats endpoint is configured.
    async fn fetch_stats(&self, id: &AppId) -> Result<Option<Value>, FetchError>;
}

pub struct HttpSource {
    client: Client,
    details_endpoint: String,
    stats_endpoint: Option<String>,
}

impl HttpSource {
    pub fn new(details_endpoint: impl Into<String>, stats_endpoint: Option<String>) -> Self {
        Self {
            client: Client::new(),
            details_endpoint: details_endpoint.into(),
            stats_endpoint,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.details_endpoint.clone(), config.stats_endpoint.clone())
    }

    async fn get_json(&self, url: String) -> Result<Value, FetchError> {
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(source) => return Err(FetchError::Transport { url, source }),
        };

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                status: response.status(),
                url,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|source| FetchError::Body { url, source })
    }
}

impl CatalogSource for HttpSource {
    async fn fetch_details(&self, id: &AppId) -> Result<Value, FetchError> {
        let url = expand_template(&self.details_endpoint, id.as_str());
        self.get_json(url).await
    }

    async fn fetch_stats(&self, id: &AppId) -> Result<Option<Value>, FetchError> {
        let Some(template) = &self.stats_endpoint else {
            return Ok(None);
        };
        let url = expand_template(template, id.as_str());
        self.get_json(url).await.map(Some)
    }
}

/// The entry for `id` in a details response, if the body has one.
pub fn entry_for<'a>(body: &'a Value, id: &AppId) -> Option<&'a Value> {
    body.get(id.as_str())
}

/// True iff the response carries `{"<id>": {"success": true, ...}}`.
pub fn is_success(body: &Value, id: &AppId) -> bool {
    entry_for(body, id)
        .and_then(|entry| entry.get("success"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
