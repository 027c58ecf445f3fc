//! HTTP client for the dialogue backend
//!
//! `send_user_input` never fails: transient errors are retried with linear
//! backoff, and when every attempt has failed the caller gets the local
//! fallback reply while the store records the failure.

use super::fallback::fallback_response;
use super::types::{ChatRequest, ChatResponse, DialogueApiError};
use crate::store::{BehaviorStore, ConnectionStatus};
use crate::utils::Stopwatch;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// Attempts after the first one
    pub max_retries: u32,

    /// Base delay; attempt `n` waits `retry_delay_ms * (n + 1)`
    pub retry_delay_ms: u64,

    /// Per-attempt request timeout
    pub timeout_ms: u64,

    pub health_timeout_ms: u64,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            timeout_ms: 15_000,
            health_timeout_ms: 5000,
        }
    }
}

impl DialogueConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    /// Wait before the attempt following `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(u64::from(attempt) + 1))
    }
}

pub struct DialogueClient {
    http: Client,
    base_url: String,
    config: DialogueConfig,
    store: BehaviorStore,
}

impl DialogueClient {
    pub fn new(base_url: impl Into<String>, config: DialogueConfig, store: BehaviorStore) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            base_url,
            config,
            store,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config(&self) -> &DialogueConfig {
        &self.config
    }

    /// Send one user turn and return the reply, or the offline fallback
    pub async fn send_user_input(&self, request: &ChatRequest) -> ChatResponse {
        let max_retries = self.config.max_retries;
        let mut last_error: Option<DialogueApiError> = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                self.store.set_connection_status(ConnectionStatus::Connecting);
            }

            let stopwatch = Stopwatch::start();
            match self.attempt(request).await {
                Ok(response) => {
                    info!(
                        attempt = attempt,
                        elapsed_ms = stopwatch.elapsed_ms(),
                        "Chat reply received"
                    );
                    self.store.set_connection_status(ConnectionStatus::Connected);
                    self.store.clear_error();
                    return response;
                }
                Err(e) => {
                    warn!(
                        attempt = attempt,
                        status = e.status,
                        retryable = e.retryable,
                        "Chat request failed: {}",
                        e
                    );
                    let retry = e.retryable && attempt < max_retries;
                    last_error = Some(e);
                    if !retry {
                        break;
                    }
                    tokio::time::sleep(self.config.backoff(attempt)).await;
                }
            }
        }

        let message = last_error
            .map(|e| e.message)
            .unwrap_or_else(|| "dialogue service unavailable".to_string());
        error!("Dialogue service unavailable, replying offline: {}", message);
        self.store.set_connection_status(ConnectionStatus::Error);
        self.store.set_error(Some(message));
        fallback_response(&request.user_text)
    }

    async fn attempt(&self, request: &ChatRequest) -> Result<ChatResponse, DialogueApiError> {
        let url = format!("{}/v1/chat", self.base_url);
        debug!(url = %url, text_len = request.user_text.len(), "Sending chat request");

        let response = self
            .http
            .post(&url)
            .timeout(self.config.timeout())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DialogueApiError::from_status(status.as_u16()));
        }
        response
            .json::<ChatResponse>()
            .await
            .map_err(|_| DialogueApiError::invalid_response(status.as_u16()))
    }

    /// Probe `GET /health`. Any failure counts as unhealthy.
    pub async fn check_server_health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .http
            .get(&url)
            .timeout(self.config.health_timeout())
            .send()
            .await
        {
            Ok(response) => {
                let healthy = response.status().is_success();
                debug!(status = %response.status(), "Health check");
                healthy
            }
            Err(e) => {
                debug!("Health check failed: {}", e);
                false
            }
        }
    }
}
