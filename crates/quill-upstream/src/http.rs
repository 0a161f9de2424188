//! HTTP implementation of the document API

use async_trait::async_trait;
use quill_core::config::UpstreamConfig;
use quill_core::{QuillError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::api::{Comment, DocumentApi, DocumentSnapshot};
use crate::circuit_breaker::CircuitBreaker;

#[derive(Deserialize)]
struct CommentsEnvelope {
    comments: Vec<Comment>,
}

/// reqwest client for the upstream REST API
pub struct HttpDocumentApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
    token_header: String,
    breaker: CircuitBreaker,
}

impl HttpDocumentApi {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        token_header: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QuillError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            token_header: token_header.into(),
            breaker: CircuitBreaker::default(),
        })
    }

    /// Build from config, reading the token from the configured env var
    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env).map_err(|_| {
            QuillError::Config(format!(
                "Upstream API token not set (expected in ${})",
                config.token_env
            ))
        })?;
        Self::new(
            &config.base_url,
            token,
            &config.token_header,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        if !self.breaker.can_execute() {
            return Err(QuillError::UpstreamUnavailable(format!(
                "circuit open after {} failures; retry in {}s",
                self.breaker.failure_count(),
                self.breaker.time_until_retry() / 1000
            )));
        }

        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header(self.token_header.as_str(), &self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                self.breaker.record_failure();
                QuillError::Upstream(format!("Request to {} failed: {}", path, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());

            // 4xx means a bad request from us, not a sick upstream
            if status.is_server_error() || status.as_u16() == 429 {
                self.breaker.record_failure();
                warn!(
                    "Upstream failure {} (breaker count: {})",
                    status,
                    self.breaker.failure_count()
                );
            }
            return Err(QuillError::Upstream(format!(
                "{} returned {}: {}",
                path, status, body
            )));
        }

        let value = response
            .json::<Value>()
            .await
            .map_err(|e| QuillError::Upstream(format!("Invalid JSON from {}: {}", path, e)))?;

        self.breaker.record_success();
        Ok(value)
    }
}

#[async_trait]
impl DocumentApi for HttpDocumentApi {
    #[instrument(skip(self))]
    async fn get_file(&self, file_key: &str) -> Result<DocumentSnapshot> {
        let value = self.get_json(&format!("/v1/files/{}", file_key), &[]).await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip(self))]
    async fn get_nodes(&self, file_key: &str, ids: &[String]) -> Result<Value> {
        self.get_json(
            &format!("/v1/files/{}/nodes", file_key),
            &[("ids", ids.join(","))],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn get_comments(&self, file_key: &str) -> Result<Vec<Comment>> {
        let value = self
            .get_json(&format!("/v1/files/{}/comments", file_key), &[])
            .await?;
        let envelope: CommentsEnvelope = serde_json::from_value(value)?;
        Ok(envelope.comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let api = HttpDocumentApi::new(
            "https://example.test/",
            "token",
            "X-Token",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(api.base_url, "https://example.test");
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let config = UpstreamConfig {
            token_env: "QUILL_TEST_TOKEN_THAT_IS_NEVER_SET".to_string(),
            ..Default::default()
        };
        let err = HttpDocumentApi::from_config(&config).err().unwrap();
        assert!(matches!(err, QuillError::Config(_)));
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let api = HttpDocumentApi::new(
            "http://127.0.0.1:9",
            "token",
            "X-Token",
            Duration::from_millis(200),
        )
        .unwrap();
        for _ in 0..3 {
            api.breaker().record_failure();
        }

        let err = api.get_file("abc").await.unwrap_err();
        assert!(matches!(err, QuillError::UpstreamUnavailable(_)));
    }
}
