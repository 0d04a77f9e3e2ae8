//! Embedding providers: caption and vector generation behind a trait.
//!
//! The catalog never talks to a model directly. [`HttpProvider`] targets a
//! captioning server over JSON; [`DisabledProvider`] is used when no
//! provider is configured and fails every call with a clear message.
//!
//! Retry strategy for the HTTP provider:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use crate::embedding::Embedding;
use crate::error::{Result, SnapdexError};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_RETRIES: usize = 3;

/// Caption and embedding produced for one image.
#[derive(Debug, Clone)]
pub struct CaptionOutput {
    /// Model-written caption; None when the model declines to produce one.
    pub caption: Option<String>,
    pub embedding: Embedding,
}

/// An external model that captions images and embeds images and text into
/// one shared vector space.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Caption an image and embed it.
    async fn embed_image(&self, bytes: &[u8], filename: &str) -> Result<CaptionOutput>;

    /// Embed a free-text query into the same space as the images.
    async fn embed_text(&self, text: &str) -> Result<Embedding>;

    /// Provider identifier for logs and stats.
    fn name(&self) -> &str;
}

/// Build a provider from an optional base URL.
pub fn create_provider(url: Option<&str>) -> Result<Arc<dyn EmbeddingProvider>> {
    match url {
        Some(url) => Ok(Arc::new(HttpProvider::new(url)?)),
        None => Ok(Arc::new(DisabledProvider)),
    }
}

// ============ Disabled Provider ============

/// A no-op provider that always returns errors.
///
/// Used when no provider URL is configured. Dedup hits, hash queries, and
/// raw vector queries still work; anything needing the model fails with a
/// descriptive error.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    async fn embed_image(&self, _bytes: &[u8], _filename: &str) -> Result<CaptionOutput> {
        Err(SnapdexError::Provider(
            "no embedding provider configured (set --provider-url)".to_string(),
        ))
    }

    async fn embed_text(&self, _text: &str) -> Result<Embedding> {
        Err(SnapdexError::Provider(
            "no embedding provider configured (set --provider-url)".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

// ============ HTTP Provider ============

#[derive(Debug, Deserialize)]
struct CaptionResponse {
    caption: Option<String>,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbedTextResponse {
    embedding: Vec<f32>,
}

/// Provider backed by a captioning model server.
///
/// `POST {base}/caption` with `{"image_base64", "filename"}` returns
/// `{"caption", "embedding"}`; `POST {base}/embed_text` with `{"text"}`
/// returns `{"embedding"}`.
pub struct HttpProvider {
    base_url: String,
    client: reqwest::Client,
    max_retries: usize,
}

impl HttpProvider {
    /// Create a provider for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| SnapdexError::Provider(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            base_url,
            client,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json::<T>().await.map_err(|e| {
                            SnapdexError::Provider(format!("invalid JSON from {}: {}", url, e))
                        });
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(SnapdexError::Provider(format!(
                            "{} returned {}: {}",
                            url, status, body_text
                        )));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(SnapdexError::Provider(format!(
                        "{} returned {}: {}",
                        url, status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(SnapdexError::Provider(format!(
                        "request to {} failed: {}",
                        url, e
                    )));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            SnapdexError::Provider("provider call failed after retries".to_string())
        }))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpProvider {
    async fn embed_image(&self, bytes: &[u8], filename: &str) -> Result<CaptionOutput> {
        let body = serde_json::json!({
            "image_base64": base64::engine::general_purpose::STANDARD.encode(bytes),
            "filename": filename,
        });
        let resp: CaptionResponse = self.post_json("/caption", &body).await?;
        if resp.embedding.is_empty() {
            return Err(SnapdexError::Provider(
                "provider returned an empty embedding".to_string(),
            ));
        }
        Ok(CaptionOutput {
            caption: resp.caption,
            embedding: resp.embedding.into(),
        })
    }

    async fn embed_text(&self, text: &str) -> Result<Embedding> {
        let body = serde_json::json!({ "text": text });
        let resp: EmbedTextResponse = self.post_json("/embed_text", &body).await?;
        if resp.embedding.is_empty() {
            return Err(SnapdexError::Provider(
                "provider returned an empty embedding".to_string(),
            ));
        }
        Ok(resp.embedding.into())
    }

    fn name(&self) -> &str {
        "http"
    }
}
