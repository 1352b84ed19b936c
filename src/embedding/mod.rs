//! Text Embeddings
//!
//! Information Hiding:
//! - Model choice (local hashing, remote HTTP) hidden behind the `Embedder` trait
//! - Caching is a decorator, transparent to callers

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod cache;
pub mod hashing;
pub mod http;

pub use cache::CachedEmbedder;
pub use hashing::HashingEmbedder;
pub use http::HttpEmbedder;

pub type Embedding = Vec<f32>;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize;
}

/// Builds the configured embedder, wrapped in a cache when `cache_size > 0`.
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.provider {
        EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(config.dimensions)),
        EmbeddingProvider::Http => {
            let url = config
                .url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("embedding.url is required for the http provider"))?;
            let api_key = config
                .api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok());
            Arc::new(HttpEmbedder::new(
                url,
                config.model.clone(),
                api_key,
                config.dimensions,
                Duration::from_secs(config.timeout_secs.max(1)),
            )?)
        }
    };

    tracing::info!(
        "[Embedding] Using {:?} embedder ({} dimensions)",
        config.provider,
        embedder.dimensions()
    );

    if config.cache_size > 0 {
        Ok(Arc::new(CachedEmbedder::new(embedder, config.cache_size)))
    } else {
        Ok(embedder)
    }
}

/// Cosine similarity in [-1, 1]. Zero for empty, zero-norm or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
