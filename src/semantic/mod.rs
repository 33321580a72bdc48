//! Semantic matching of free-text queries against image labels.
//!
//! # Architecture
//!
//! - `normalize`: stop-word removal for queries and label text
//! - `embeddings`: fastembed model wrapper and its loader
//! - `provider`: lazily loaded, shared model with retry-on-failure
//! - `similarity`: cosine scoring
//! - `cache`: optional per-item label embedding cache
//! - `ranking`: the query → ordered ids pipeline

mod cache;
pub mod embeddings;
mod normalize;
pub mod provider;
mod ranking;
mod similarity;

pub use embeddings::{EmbeddingError, FastembedLoader};
pub use provider::{Embedder, EmbeddingProvider, ModelLoader, ProviderStatus};
pub use ranking::{Candidate, RankError, RankedResult, RankingEngine, DEFAULT_THRESHOLD};
pub use similarity::SimilarityError;

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
