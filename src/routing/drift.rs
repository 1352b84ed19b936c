//! Topic drift for bound sessions.
//!
//! A bound agent keeps the thread while the new message scores at least
//! `threshold - topic_drift_threshold` (floored at zero) against its examples.

use super::semantic::SemanticRouter;
use crate::agents::AgentDescriptor;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriftVerdict {
    /// Within the bound agent's band.
    Stable { score: f32 },
    /// Below the band; the message must be routed afresh.
    Drifted { score: f32 },
    /// The bound agent has no examples, so there is no band to be inside.
    Unscored,
}

#[derive(Debug, Clone, Copy)]
pub struct DriftDetector {
    drift_threshold: f32,
}

impl DriftDetector {
    pub fn new(drift_threshold: f32) -> Self {
        Self {
            drift_threshold: drift_threshold.clamp(0.0, 1.0),
        }
    }

    pub fn tolerance_for(&self, threshold: f32) -> f32 {
        (threshold - self.drift_threshold).max(0.0)
    }

    pub fn evaluate(
        &self,
        semantic: &SemanticRouter,
        bound: &AgentDescriptor,
        embedding: &[f32],
    ) -> DriftVerdict {
        let threshold = match bound.threshold() {
            Some(threshold) if !bound.examples().is_empty() => threshold,
            _ => return DriftVerdict::Unscored,
        };

        let (score, _) = semantic.score(&bound.id, embedding);
        let tolerance = self.tolerance_for(threshold);
        if score >= tolerance {
            DriftVerdict::Stable { score }
        } else {
            tracing::info!(
                agent_id = %bound.id,
                score,
                tolerance,
                "[DriftDetector] Topic drift detected"
            );
            DriftVerdict::Drifted { score }
        }
    }
}
