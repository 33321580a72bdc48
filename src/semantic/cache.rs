//! Per-item cache of label embeddings.
//!
//! Entries are keyed by item id and remember a digest of the text that was
//! embedded. A lookup only hits when the digest matches, so a cached vector
//! is always the one a fresh embed of the same text would produce.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

struct CachedEmbedding {
    text_hash: [u8; 32],
    embedding: Vec<f32>,
}

#[derive(Default)]
pub struct EmbeddingCache {
    entries: Mutex<HashMap<String, CachedEmbedding>>,
}

fn text_hash(text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str, text: &str) -> Option<Vec<f32>> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(id)
            .filter(|entry| entry.text_hash == text_hash(text))
            .map(|entry| entry.embedding.clone())
    }

    pub fn insert(&self, id: &str, text: &str, embedding: Vec<f32>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                id.to_string(),
                CachedEmbedding {
                    text_hash: text_hash(text),
                    embedding,
                },
            );
        }
    }

    pub fn invalidate(&self, id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(id);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
