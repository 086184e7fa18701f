//! External activity catalog.
//!
//! The engine is oblivious to the transport; it sees a batch of activities
//! with embeddings and, on a session's first fetch, an optional base-model
//! snapshot. The HTTP implementation speaks the upstream game endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::engine::model::ModelParameters;
use crate::engine::types::Activity;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const MAX_RETRIES: usize = 3;
const BASE_BACKOFF_MS: u64 = 200;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// One catalog fetch result. `session_id` and `base_weights` are only present
/// on the first call of a session.
#[derive(Debug, Clone)]
pub struct CatalogBatch {
    pub session_id: Option<String>,
    pub activities: Vec<Activity>,
    pub base_weights: Option<ModelParameters>,
}

#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn fetch_batch(&self, context_tags: &[String]) -> Result<CatalogBatch, CatalogError>;
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl CatalogConfig {
    pub fn from_env() -> Self {
        let base_url = std::env::var("CATALOG_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "http://localhost:8000".to_string());
        let timeout_ms = std::env::var("CATALOG_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        Self {
            base_url,
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GameStartResponse {
    session_id: Option<String>,
    #[serde(default)]
    recommendations: Vec<Activity>,
    base_ai_weights: Option<ModelParameters>,
}

pub struct HttpCatalog {
    config: CatalogConfig,
    client: reqwest::Client,
}

impl HttpCatalog {
    pub fn new(config: CatalogConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    pub fn from_env() -> Self {
        Self::new(CatalogConfig::from_env())
    }

    async fn post_with_retry(&self, tags: &[String]) -> Result<GameStartResponse, CatalogError> {
        let url = format!(
            "{}/activities/game/start",
            self.config.base_url.trim_end_matches('/')
        );
        let mut last_error = None;
        for retry in 0..=MAX_RETRIES {
            // the game/start body is the bare tag array
            let result = self.client.post(&url).json(&tags).send().await;
            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body = resp.text().await.map_err(CatalogError::Request)?;
                        return Ok(serde_json::from_str(&body)?);
                    }
                    let body = resp.text().await.unwrap_or_default();
                    let err = CatalogError::HttpStatus { status, body };
                    if retry < MAX_RETRIES && is_retryable(status) {
                        let backoff = Duration::from_millis(BASE_BACKOFF_MS * (1 << retry));
                        warn!(retry, ?status, "catalog fetch failed, retrying");
                        sleep(backoff).await;
                        last_error = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    let err = CatalogError::Request(e);
                    if retry < MAX_RETRIES {
                        let backoff = Duration::from_millis(BASE_BACKOFF_MS * (1 << retry));
                        warn!(retry, "catalog request error, retrying");
                        sleep(backoff).await;
                        last_error = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }
        Err(last_error.unwrap_or(CatalogError::HttpStatus {
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
        }))
    }
}

#[async_trait]
impl CatalogProvider for HttpCatalog {
    async fn fetch_batch(&self, context_tags: &[String]) -> Result<CatalogBatch, CatalogError> {
        let resp = self.post_with_retry(context_tags).await?;
        Ok(CatalogBatch {
            session_id: resp.session_id,
            activities: resp.recommendations,
            base_weights: resp.base_ai_weights,
        })
    }
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}
