//! Query-to-image ranking over label text.
//!
//! One request embeds the query and every candidate in a single batch,
//! scores each candidate against the query, drops anything at or below the
//! threshold and returns the survivors best first.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::catalog::Item;
use crate::semantic::{
    cache::EmbeddingCache,
    embeddings::EmbeddingError,
    normalize::normalize,
    provider::EmbeddingProvider,
    similarity::{cosine_similarity, SimilarityError},
};

/// Minimum similarity (exclusive) for a candidate to be returned.
pub const DEFAULT_THRESHOLD: f32 = 0.3;

/// An item under consideration: its id and its flattened label text.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub text: String,
}

impl Candidate {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    pub fn from_item(item: &Item) -> Self {
        Self::new(item.id.clone(), item.label_text())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub id: String,
    pub score: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(#[from] EmbeddingError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Similarity failed: {0}")]
    Similarity(#[from] SimilarityError),
}

#[inline]
pub fn passes_threshold(score: f32, threshold: f32) -> bool {
    score > threshold
}

pub struct RankingEngine {
    provider: Arc<EmbeddingProvider>,
    threshold: f32,
    cache: Option<EmbeddingCache>,
}

impl RankingEngine {
    pub fn new(provider: Arc<EmbeddingProvider>) -> Self {
        Self {
            provider,
            threshold: DEFAULT_THRESHOLD,
            cache: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Reuse label embeddings across requests.
    pub fn with_cache(mut self) -> Self {
        self.cache = Some(EmbeddingCache::new());
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn provider(&self) -> &Arc<EmbeddingProvider> {
        &self.provider
    }

    #[cfg(test)]
    pub fn cache(&self) -> Option<&EmbeddingCache> {
        self.cache.as_ref()
    }

    /// Drop any cached embedding for `id`.
    pub fn invalidate(&self, id: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(id);
        }
    }

    /// Rank `candidates` against `query`, returning matching ids best first.
    ///
    /// An empty result means nothing cleared the threshold; model failures
    /// are reported as [`RankError::ModelUnavailable`], never as no matches.
    pub fn rank(&self, query: &str, candidates: &[Candidate]) -> Result<Vec<String>, RankError> {
        Ok(self
            .rank_scored(query, candidates)?
            .into_iter()
            .map(|result| result.id)
            .collect())
    }

    /// Same as [`rank`](Self::rank) but keeps the scores.
    pub fn rank_scored(
        &self,
        query: &str,
        candidates: &[Candidate],
    ) -> Result<Vec<RankedResult>, RankError> {
        if candidates.is_empty() {
            return Ok(vec![]);
        }

        Self::validate(candidates)?;

        let normalized_query = normalize(query);
        let normalized: Vec<String> = candidates.iter().map(|c| normalize(&c.text)).collect();

        // query first, then every candidate the cache can't answer
        let mut batch = Vec::with_capacity(candidates.len() + 1);
        batch.push(normalized_query);

        let mut cached: Vec<Option<Vec<f32>>> = Vec::with_capacity(candidates.len());
        for (candidate, text) in candidates.iter().zip(&normalized) {
            let hit = self
                .cache
                .as_ref()
                .and_then(|cache| cache.get(&candidate.id, text));
            if hit.is_none() {
                batch.push(text.clone());
            }
            cached.push(hit);
        }

        let mut embeddings = self.provider.embed(&batch)?.into_iter();
        let query_embedding = embeddings.next().ok_or_else(|| {
            EmbeddingError::EmbeddingFailed("No embedding returned for query".to_string())
        })?;

        let mut results = Vec::with_capacity(candidates.len());
        for ((candidate, text), hit) in candidates.iter().zip(&normalized).zip(cached) {
            let embedding = match hit {
                Some(embedding) => embedding,
                None => {
                    let fresh = embeddings.next().ok_or_else(|| {
                        EmbeddingError::EmbeddingFailed(format!(
                            "No embedding returned for {}",
                            candidate.id
                        ))
                    })?;
                    if let Some(cache) = &self.cache {
                        cache.insert(&candidate.id, text, fresh.clone());
                    }
                    fresh
                }
            };

            let score = cosine_similarity(&query_embedding, &embedding)?;
            if passes_threshold(score, self.threshold) {
                results.push(RankedResult {
                    id: candidate.id.clone(),
                    score,
                });
            }
        }

        // stable: equal scores keep candidate order
        results.sort_by(|a, b| b.score.total_cmp(&a.score));

        log::debug!(
            "ranked {} candidates, {} above {}",
            candidates.len(),
            results.len(),
            self.threshold
        );

        Ok(results)
    }

    fn validate(candidates: &[Candidate]) -> Result<(), RankError> {
        let mut seen = HashSet::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.id.is_empty() {
                return Err(RankError::InvalidInput("candidate id is empty".to_string()));
            }
            if !seen.insert(candidate.id.as_str()) {
                return Err(RankError::InvalidInput(format!(
                    "duplicate candidate id: {}",
                    candidate.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_exclusive() {
        assert!(!passes_threshold(0.3, DEFAULT_THRESHOLD));
        assert!(passes_threshold(
            f32::from_bits(0.3_f32.to_bits() + 1),
            DEFAULT_THRESHOLD
        ));
        assert!(!passes_threshold(0.29, DEFAULT_THRESHOLD));
        assert!(passes_threshold(0.31, DEFAULT_THRESHOLD));
    }

    #[test]
    fn test_candidate_from_item() {
        use crate::catalog::LabelTag;

        let item = Item {
            id: "img3".to_string(),
            labels: vec![
                LabelTag::new("cat", 0.9),
                LabelTag::new("playing", 0.8),
                LabelTag::new("piano", 0.7),
            ],
        };
        assert_eq!(
            Candidate::from_item(&item),
            Candidate::new("img3", "cat playing piano")
        );
    }
}
