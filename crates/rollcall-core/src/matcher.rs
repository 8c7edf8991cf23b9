//! Identity resolution from a single face embedding.

use crate::error::ConfigError;
use crate::filter::check_range;
use crate::types::{Embedding, Identity, Label};
use serde::{Deserialize, Serialize};
use std::ops::Bound;

const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.6;
/// Threshold relief granted in mask mode, where the lower face is occluded.
const MASK_MODE_OFFSET: f32 = 0.1;
/// Mask mode never lowers the threshold below this.
const MASK_MODE_FLOOR: f32 = 0.4;

/// How a query embedding is scored against enrolled embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Plain dot product. Only correct when every embedding is unit-norm,
    /// which ArcFace-family detectors guarantee.
    #[default]
    Dot,
    /// Full cosine similarity, for embedding sources that are not normalized.
    Cosine,
}

impl SimilarityMetric {
    pub fn score(&self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            SimilarityMetric::Dot => a.dot(b),
            SimilarityMetric::Cosine => a.cosine(b),
        }
    }
}

/// Active matching configuration supplied alongside the roster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    /// Minimum similarity for a match to count, in (0, 1].
    pub similarity_threshold: f32,
    /// Relax the threshold for faces wearing masks.
    pub mask_mode: bool,
    pub metric: SimilarityMetric,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            mask_mode: false,
            metric: SimilarityMetric::Dot,
        }
    }
}

impl MatchParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "similarity_threshold",
            self.similarity_threshold,
            (Bound::Excluded(0.0), Bound::Included(1.0)),
            "(0, 1]",
        )
    }

    /// Threshold actually applied to match scores.
    pub fn effective_threshold(&self) -> f32 {
        if self.mask_mode {
            (self.similarity_threshold - MASK_MODE_OFFSET).max(MASK_MODE_FLOOR)
        } else {
            self.similarity_threshold
        }
    }
}

/// Best identity for a query embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub label: Label,
    /// Similarity of the best enrolled embedding; 0.0 when nothing was compared.
    pub score: f32,
}

impl MatchResult {
    pub fn unknown() -> Self {
        Self {
            label: Label::Unknown,
            score: 0.0,
        }
    }
}

/// Strategy for resolving a face embedding to an enrolled identity.
pub trait Matcher {
    /// Raw best match, with no threshold applied.
    fn find_best_match(&self, query: &Embedding) -> MatchResult;

    fn effective_threshold(&self) -> f32;

    /// Embedding dimension the matcher expects, if it has any enrolled data.
    fn dimension(&self) -> Option<usize>;

    /// Best match with the threshold applied: below it the label becomes
    /// `Unknown`, while the raw score is preserved for display.
    fn classify(&self, query: &Embedding) -> MatchResult {
        let best = self.find_best_match(query);
        if best.score >= self.effective_threshold() {
            best
        } else {
            MatchResult {
                label: Label::Unknown,
                score: best.score,
            }
        }
    }
}

/// Nearest-neighbour matcher over an in-memory registry of enrolled identities.
///
/// The registry is replaced wholesale by [`rebuild`](Self::rebuild); there is
/// no incremental update.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingMatcher {
    identities: Vec<Identity>,
    params: MatchParams,
    dimension: Option<usize>,
}

impl EmbeddingMatcher {
    pub fn new(identities: Vec<Identity>, params: MatchParams) -> Result<Self, ConfigError> {
        let mut matcher = Self::default();
        matcher.rebuild(identities, params)?;
        Ok(matcher)
    }

    /// Replace the registry and parameters.
    ///
    /// Identities without embeddings are dropped and repeated labels are
    /// merged in first-seen order. On error the previous registry is kept.
    pub fn rebuild(
        &mut self,
        identities: Vec<Identity>,
        params: MatchParams,
    ) -> Result<(), ConfigError> {
        params.validate()?;

        let mut merged: Vec<Identity> = Vec::with_capacity(identities.len());
        let mut dimension: Option<usize> = None;

        for identity in identities {
            if identity.embeddings.is_empty() {
                tracing::warn!(label = %identity.label, "identity has no embeddings; skipping");
                continue;
            }

            for embedding in &identity.embeddings {
                let dim = embedding.dimension();
                if dim == 0 {
                    return Err(ConfigError::ZeroDimension {
                        label: identity.label.clone(),
                    });
                }
                match dimension {
                    None => dimension = Some(dim),
                    Some(expected) if expected != dim => {
                        return Err(ConfigError::DimensionMismatch {
                            label: identity.label.clone(),
                            expected,
                            actual: dim,
                        });
                    }
                    Some(_) => {}
                }
            }

            match merged.iter_mut().find(|m| m.label == identity.label) {
                Some(existing) => {
                    tracing::debug!(label = %identity.label, "merging repeated enrollment");
                    existing.embeddings.extend(identity.embeddings);
                }
                None => merged.push(identity),
            }
        }

        tracing::info!(
            identities = merged.len(),
            embeddings = merged.iter().map(|i| i.embeddings.len()).sum::<usize>(),
            dimension = ?dimension,
            threshold = params.effective_threshold(),
            mask_mode = params.mask_mode,
            "registry rebuilt"
        );

        self.identities = merged;
        self.params = params;
        self.dimension = dimension;
        Ok(())
    }

    pub fn params(&self) -> &MatchParams {
        &self.params
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl Matcher for EmbeddingMatcher {
    /// Compares against every embedding of every identity and keeps the maximum.
    ///
    /// Equal scores resolve to the identity enrolled first.
    fn find_best_match(&self, query: &Embedding) -> MatchResult {
        if query.is_empty() || self.dimension != Some(query.dimension()) {
            return MatchResult::unknown();
        }

        let metric = self.params.metric;
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, identity) in self.identities.iter().enumerate() {
            for embedding in &identity.embeddings {
                let sim = metric.score(query, embedding);
                if sim > best_sim {
                    best_sim = sim;
                    best_idx = Some(i);
                }
            }
        }

        match best_idx {
            Some(idx) => MatchResult {
                label: Label::Known(self.identities[idx].label.clone()),
                score: best_sim,
            },
            None => MatchResult::unknown(),
        }
    }

    fn effective_threshold(&self) -> f32 {
        self.params.effective_threshold()
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}
