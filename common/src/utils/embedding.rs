use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
    time::Duration,
};

use async_openai::{types::CreateEmbeddingRequestArgs, Client};
use tracing::debug;

use crate::{
    error::AppError,
    utils::config::{AppConfig, EmbeddingBackend},
};

/// Opaque `embed(text) -> vector` collaborator. The `Hashed` backend is a
/// deterministic in-process stand-in used by tests and offline setups.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAI {
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
        dimensions: u32,
        timeout: Duration,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn from_config(
        config: &AppConfig,
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
    ) -> Self {
        match config.embedding_backend {
            EmbeddingBackend::OpenAI => Self::new_openai(
                client,
                config.embedding_model.clone(),
                config.embedding_dimensions,
                Duration::from_secs(config.llm_timeout_secs),
            ),
            EmbeddingBackend::Hashed => Self::new_hashed(config.embedding_dimensions as usize),
        }
    }

    pub fn new_openai(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
        dimensions: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
                timeout,
            },
        }
    }

    pub fn new_hashed(dimension: usize) -> Self {
        Self {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Hashed { .. } => "hashed",
            EmbeddingInner::OpenAI { .. } => "openai",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => *dimension,
            EmbeddingInner::OpenAI { dimensions, .. } => *dimensions as usize,
        }
    }

    pub fn model_code(&self) -> Option<String> {
        match &self.inner {
            EmbeddingInner::OpenAI { model, .. } => Some(model.clone()),
            EmbeddingInner::Hashed { .. } => None,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(hashed_embedding(text, *dimension)),
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
                timeout,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input([text])
                    .dimensions(*dimensions)
                    .build()
                    .map_err(|e| AppError::Embedding(e.to_string()))?;

                let response = tokio::time::timeout(*timeout, client.embeddings().create(request))
                    .await
                    .map_err(|_| {
                        AppError::Embedding(format!(
                            "embedding request timed out after {}s",
                            timeout.as_secs()
                        ))
                    })?
                    .map_err(|e| AppError::Embedding(e.to_string()))?;

                let embedding = response
                    .data
                    .first()
                    .ok_or_else(|| {
                        AppError::Embedding("No embedding data received from API".into())
                    })?
                    .embedding
                    .clone();

                debug!(dimensions = embedding.len(), "embedding created");
                Ok(embedding)
            }
        }
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(texts
                .into_iter()
                .map(|text| hashed_embedding(&text, *dimension))
                .collect()),
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
                timeout,
            } => {
                if texts.is_empty() {
                    return Ok(Vec::new());
                }

                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input(texts)
                    .dimensions(*dimensions)
                    .build()
                    .map_err(|e| AppError::Embedding(e.to_string()))?;

                let response = tokio::time::timeout(*timeout, client.embeddings().create(request))
                    .await
                    .map_err(|_| {
                        AppError::Embedding(format!(
                            "embedding request timed out after {}s",
                            timeout.as_secs()
                        ))
                    })?
                    .map_err(|e| AppError::Embedding(e.to_string()))?;

                Ok(response
                    .data
                    .into_iter()
                    .map(|item| item.embedding)
                    .collect())
            }
        }
    }
}

// Helper functions for hashed embeddings
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    let mut token_count = 0f32;
    for token in tokens(text) {
        token_count += 1.0;
        let idx = bucket(&token, dim);
        vector[idx] += 1.0;
    }

    if token_count == 0.0 {
        return vector;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashed_embedding_is_deterministic() {
        let provider = EmbeddingProvider::new_hashed(64);
        let a = provider.embed("the self is eternal").await.unwrap();
        let b = provider.embed("the self is eternal").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_hashed_embedding_is_normalized() {
        let provider = EmbeddingProvider::new_hashed(32);
        let vector = provider.embed("action without attachment").await.unwrap();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hashed_embedding_empty_input() {
        let provider = EmbeddingProvider::new_hashed(16);
        let vector = provider.embed("").await.unwrap();
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_embed_batch_matches_single() {
        let provider = EmbeddingProvider::new_hashed(48);
        let batch = provider
            .embed_batch(vec!["one".into(), "two".into()])
            .await
            .unwrap();
        let single = provider.embed("two").await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], single);
    }

    #[test]
    fn test_zero_dimension_clamped() {
        let provider = EmbeddingProvider::new_hashed(0);
        assert_eq!(provider.dimension(), 1);
    }
}
