//! Fire-and-forget notification to the upstream base-model trainer.
//!
//! Success or failure never affects local ranking; the engine spawns the call
//! and moves on.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },
}

#[async_trait]
pub trait TrainingSink: Send + Sync {
    async fn notify_choice(
        &self,
        session_id: &str,
        chosen_activity_id: i64,
        context_tags: &[String],
    ) -> Result<(), TrainerError>;
}

#[derive(Debug, Serialize)]
struct TrainRequest<'a> {
    session_id: &'a str,
    chosen_activity_id: i64,
    context_tags: &'a [String],
}

pub struct HttpTrainingSink {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTrainingSink {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { base_url, client }
    }

    pub fn from_env() -> Self {
        let base_url = std::env::var("CATALOG_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "http://localhost:8000".to_string());
        let timeout_ms = std::env::var("TRAINER_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        Self::new(base_url, Duration::from_millis(timeout_ms))
    }
}

#[async_trait]
impl TrainingSink for HttpTrainingSink {
    async fn notify_choice(
        &self,
        session_id: &str,
        chosen_activity_id: i64,
        context_tags: &[String],
    ) -> Result<(), TrainerError> {
        let url = format!(
            "{}/activities/game/train",
            self.base_url.trim_end_matches('/')
        );
        let payload = TrainRequest {
            session_id,
            chosen_activity_id,
            context_tags,
        };
        let resp = self.client.post(&url).json(&payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TrainerError::HttpStatus { status, body });
        }
        Ok(())
    }
}
