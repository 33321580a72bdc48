//! Cross-module tests and shared fixtures.
//!
//! The fake embedders here are deterministic stand-ins for the real model so
//! ranking behaviour can be asserted exactly without a model download.


use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::app::App;
use crate::catalog::CatalogCsv;
use crate::labeler::StaticLabeler;
use crate::semantic::{
    Embedder, EmbeddingError, EmbeddingProvider, ModelLoader, RankingEngine,
};
use crate::storage::BackendLocal;

/// PNG signature plus IHDR chunk header, enough for content sniffing.
pub const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
];

const VOCAB_DIMENSIONS: usize = 64;

/// Bag-of-words embedder: every distinct token gets its own axis.
///
/// Cosine similarity then measures token overlap, and the empty string maps
/// to the zero vector. Records the size of every batch it is asked for.
#[derive(Default)]
pub struct VocabEmbedder {
    vocab: Mutex<HashMap<String, usize>>,
    batches: Mutex<Vec<usize>>,
}

impl VocabEmbedder {
    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    fn axis(&self, token: &str) -> usize {
        let mut vocab = self.vocab.lock().unwrap();
        let next = vocab.len();
        *vocab.entry(token.to_string()).or_insert(next) % VOCAB_DIMENSIONS
    }
}

impl Embedder for VocabEmbedder {
    fn dimensions(&self) -> usize {
        VOCAB_DIMENSIONS
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.batches.lock().unwrap().push(texts.len());

        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0; VOCAB_DIMENSIONS];
                for token in text.split_whitespace() {
                    v[self.axis(token)] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Embedder returning fixed vectors per text; unknown text is an error.
pub struct TableEmbedder {
    pub table: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    pub fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            table: entries
                .iter()
                .map(|(text, v)| (text.to_string(), v.clone()))
                .collect(),
        }
    }
}

impl Embedder for TableEmbedder {
    fn dimensions(&self) -> usize {
        self.table.values().next().map(|v| v.len()).unwrap_or(0)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts
            .iter()
            .map(|text| {
                self.table
                    .get(text)
                    .cloned()
                    .ok_or_else(|| EmbeddingError::EmbeddingFailed(format!("no vector for {text:?}")))
            })
            .collect()
    }
}

/// Loader handing out a prepared embedder, optionally slow or failing.
pub struct FakeLoader {
    embedder: Arc<dyn Embedder>,
    delay: Duration,
    failures_left: AtomicUsize,
}

impl FakeLoader {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            delay: Duration::ZERO,
            failures_left: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(self, times: usize) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }
}

impl ModelLoader for FakeLoader {
    fn describe(&self) -> String {
        "fake".to_string()
    }

    fn load(&self) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        std::thread::sleep(self.delay);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EmbeddingError::InitFailed("model host unreachable".to_string()));
        }

        Ok(self.embedder.clone())
    }
}

pub fn vocab_provider() -> (Arc<EmbeddingProvider>, Arc<VocabEmbedder>) {
    let embedder = Arc::new(VocabEmbedder::default());
    let provider = Arc::new(EmbeddingProvider::new(FakeLoader::new(embedder.clone())));
    (provider, embedder)
}

/// An isolated app over a temp dir, ranking with the bag-of-words embedder.
pub fn create_app(loader: FakeLoader) -> (App, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");

    let catalog = CatalogCsv::load(tmp.path().join("catalog.csv"))
        .expect("failed to create catalog csv");
    let storage =
        BackendLocal::new(tmp.path().join("images")).expect("failed to create storage");

    let provider = Arc::new(EmbeddingProvider::new(loader));
    let engine = RankingEngine::new(provider).with_cache();

    let app = App::new(
        Arc::new(catalog),
        Arc::new(storage),
        Arc::new(StaticLabeler::default()),
        engine,
    );
    (app, tmp)
}

pub fn create_vocab_app() -> (App, tempfile::TempDir) {
    create_app(FakeLoader::new(Arc::new(VocabEmbedder::default())))
}
