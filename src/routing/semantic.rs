//! Semantic Router
//!
//! Information Hiding:
//! - Example embeddings are computed once, when the router is built
//! - Candidates are scanned in priority order; the first agent over its own threshold wins

use crate::agents::{AgentDescriptor, AgentRegistry};
use crate::embedding::{cosine_similarity, Embedder, Embedding};
use anyhow::Result;
use std::sync::Arc;

/// Longer messages are truncated before embedding.
pub const MAX_MESSAGE_CHARS: usize = 10_000;

struct Candidate {
    agent: Arc<AgentDescriptor>,
    threshold: f32,
    examples: Vec<(String, Embedding)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    pub agent: Arc<AgentDescriptor>,
    pub score: f32,
    pub example: Option<String>,
}

pub struct SemanticRouter {
    embedder: Arc<dyn Embedder>,
    candidates: Vec<Candidate>,
}

impl SemanticRouter {
    pub async fn build(registry: &AgentRegistry, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let mut candidates = Vec::new();
        for agent in registry.routing_candidates() {
            let examples = agent.examples().to_vec();
            let embeddings = if examples.is_empty() {
                Vec::new()
            } else {
                embedder.embed_batch(&examples).await?
            };
            if embeddings.len() != examples.len() {
                anyhow::bail!(
                    "embedder returned {} vectors for {} examples of '{}'",
                    embeddings.len(),
                    examples.len(),
                    agent.id
                );
            }

            tracing::debug!(
                "[SemanticRouter] Indexed {} examples for '{}'",
                examples.len(),
                agent.id
            );
            candidates.push(Candidate {
                threshold: agent.threshold().unwrap_or(1.0),
                examples: examples.into_iter().zip(embeddings).collect(),
                agent,
            });
        }

        tracing::info!("[SemanticRouter] Ready with {} candidate agents", candidates.len());
        Ok(Self {
            embedder,
            candidates,
        })
    }

    pub async fn embed(&self, message: &str) -> Result<Embedding> {
        let text = match message.char_indices().nth(MAX_MESSAGE_CHARS) {
            Some((idx, _)) => &message[..idx],
            None => message,
        };
        self.embedder.embed(text).await
    }

    /// Best similarity between `embedding` and one agent's examples, clamped
    /// to [0, 1]. Zero for agents that are not candidates or have no examples.
    pub fn score(&self, agent_id: &str, embedding: &[f32]) -> (f32, Option<String>) {
        self.candidates
            .iter()
            .find(|c| c.agent.id == agent_id)
            .map(|c| best_example(c, embedding))
            .unwrap_or((0.0, None))
    }

    /// First candidate, in priority order, whose score clears its threshold.
    pub fn best_match(&self, embedding: &[f32]) -> Option<RouteMatch> {
        for candidate in &self.candidates {
            if candidate.examples.is_empty() {
                continue;
            }
            let (score, example) = best_example(candidate, embedding);
            tracing::debug!(
                agent_id = %candidate.agent.id,
                score,
                threshold = candidate.threshold,
                "[SemanticRouter] Scored candidate"
            );
            if score >= candidate.threshold {
                return Some(RouteMatch {
                    agent: candidate.agent.clone(),
                    score,
                    example,
                });
            }
        }
        None
    }

    pub async fn route(&self, message: &str) -> Result<Option<RouteMatch>> {
        let embedding = self.embed(message).await?;
        Ok(self.best_match(&embedding))
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }
}

fn best_example(candidate: &Candidate, embedding: &[f32]) -> (f32, Option<String>) {
    let mut best: (f32, Option<String>) = (0.0, None);
    for (text, example) in &candidate.examples {
        let score = cosine_similarity(embedding, example).clamp(0.0, 1.0);
        if best.1.is_none() || score > best.0 {
            best = (score, Some(text.clone()));
        }
    }
    best
}
