use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::errors::{AgentError, AgentResult};
use crate::providers::configs::DialProviderConfig;

/// Turns texts into dense vectors; all vectors of one embedder share a dimension
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, api_key: &str, texts: &[String]) -> AgentResult<Vec<Vec<f32>>>;
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Embeddings served by a deployment on the DIAL gateway
pub struct DialEmbedder {
    client: Client,
    config: DialProviderConfig,
    deployment: String,
    batch_size: usize,
}

impl DialEmbedder {
    pub const DEFAULT_BATCH_SIZE: usize = 64;

    pub fn new<S: Into<String>>(config: DialProviderConfig, deployment: S) -> AgentResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self {
            client,
            config,
            deployment: deployment.into(),
            batch_size: Self::DEFAULT_BATCH_SIZE,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn embed_batch(&self, api_key: &str, batch: &[String]) -> AgentResult<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(self.config.embeddings_url(&self.deployment))
            .header("Api-Key", api_key)
            .json(&json!({ "input": batch }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Provider(format!(
                "Embedding request failed: {} {}",
                status, body
            )));
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != batch.len() {
            return Err(AgentError::Provider(format!(
                "Expected {} embeddings, received {}",
                batch.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for DialEmbedder {
    async fn embed(&self, api_key: &str, texts: &[String]) -> AgentResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(api_key, batch).await?);
        }
        tracing::debug!(
            deployment = %self.deployment,
            count = vectors.len(),
            "embedded texts"
        );
        Ok(vectors)
    }
}
