//! Lazily constructed, shared embedding model.
//!
//! The provider owns a small state machine:
//!
//! ```text
//! Uninitialized --first embed--> Loading --ok--> Ready
//!       ^                           |
//!       |                           +--err--> Failed --next embed--> Loading
//!       +------- loader panicked ---+
//! ```
//!
//! Only one caller runs the loader at a time; concurrent callers wait on a
//! condvar and share the result. A failed load is never sticky: the next
//! call tries again.

use serde::Serialize;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Condvar, Mutex, MutexGuard,
};

use crate::semantic::embeddings::EmbeddingError;

/// A constructed model able to embed batches of text.
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Embed `texts` in one model invocation, preserving order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Builds an [`Embedder`]. Called at most once per successful load.
pub trait ModelLoader: Send + Sync {
    /// Human readable name of what is being loaded, for logs.
    fn describe(&self) -> String;

    fn load(&self) -> Result<Arc<dyn Embedder>, EmbeddingError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProviderStatus {
    Uninitialized,
    Loading,
    Ready { dimensions: usize },
    Failed { error: String },
}

enum State {
    Uninitialized,
    Loading,
    Ready(Arc<dyn Embedder>),
    Failed(String),
}

pub struct EmbeddingProvider {
    loader: Box<dyn ModelLoader>,
    state: Mutex<State>,
    settled: Condvar,
    load_attempts: AtomicUsize,
}

impl EmbeddingProvider {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            state: Mutex::new(State::Uninitialized),
            settled: Condvar::new(),
            load_attempts: AtomicUsize::new(0),
        }
    }

    /// Embed `texts`, loading the model first if needed.
    ///
    /// Returns exactly one vector per input, in input order.
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = self.model()?;

        if texts.is_empty() {
            return Ok(vec![]);
        }

        let embeddings = model.embed_batch(texts)?;
        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "model returned {} embeddings for {} inputs",
                embeddings.len(),
                texts.len()
            )));
        }

        Ok(embeddings)
    }

    /// Load the model now instead of on first use.
    pub fn ensure_loaded(&self) -> Result<(), EmbeddingError> {
        self.model().map(|_| ())
    }

    pub fn status(&self) -> ProviderStatus {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*state {
            State::Uninitialized => ProviderStatus::Uninitialized,
            State::Loading => ProviderStatus::Loading,
            State::Ready(model) => ProviderStatus::Ready {
                dimensions: model.dimensions(),
            },
            State::Failed(error) => ProviderStatus::Failed {
                error: error.clone(),
            },
        }
    }

    /// Number of times the loader has been invoked.
    #[cfg(test)]
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, State>, EmbeddingError> {
        self.state
            .lock()
            .map_err(|e| EmbeddingError::InitFailed(format!("Provider lock poisoned: {}", e)))
    }

    fn model(&self) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        let mut state = self.lock_state()?;
        let mut waited = false;
        loop {
            match &*state {
                State::Ready(model) => return Ok(model.clone()),
                // callers that waited on a failed load share its error
                State::Failed(error) if waited => {
                    return Err(EmbeddingError::InitFailed(error.clone()))
                }
                State::Uninitialized | State::Failed(_) => break,
                State::Loading => {}
            }
            waited = true;
            state = self.settled.wait(state).map_err(|e| {
                EmbeddingError::InitFailed(format!("Provider lock poisoned: {}", e))
            })?;
        }
        *state = State::Loading;
        drop(state);

        // the loader runs without the lock held so status() stays responsive
        let guard = LoadGuard {
            provider: self,
            armed: true,
        };
        self.load_attempts.fetch_add(1, Ordering::SeqCst);
        log::info!("Loading embedding model {}", self.loader.describe());

        let result = self.loader.load();
        guard.settle(result)
    }
}

/// Moves the provider out of `Loading` even if the loader panics, so waiters
/// are never stranded.
struct LoadGuard<'a> {
    provider: &'a EmbeddingProvider,
    armed: bool,
}

impl LoadGuard<'_> {
    fn settle(
        mut self,
        result: Result<Arc<dyn Embedder>, EmbeddingError>,
    ) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        self.armed = false;

        let mut state = self
            .provider
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let result = match result {
            Ok(model) => {
                log::info!(
                    "Embedding model ready ({} dimensions)",
                    model.dimensions()
                );
                *state = State::Ready(model.clone());
                Ok(model)
            }
            Err(err) => {
                log::error!("Failed to load embedding model: {}", err);
                *state = State::Failed(err.to_string());
                Err(err)
            }
        };

        self.provider.settled.notify_all();
        result
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let mut state = self
            .provider
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *state = State::Uninitialized;
        self.provider.settled.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Barrier;
    use std::time::Duration;

    struct ConstEmbedder;

    impl Embedder for ConstEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    struct SlowLoader {
        delay: Duration,
        fail_first: AtomicBool,
    }

    impl ModelLoader for SlowLoader {
        fn describe(&self) -> String {
            "slow-test-loader".to_string()
        }

        fn load(&self) -> Result<Arc<dyn Embedder>, EmbeddingError> {
            std::thread::sleep(self.delay);
            if self.fail_first.swap(false, Ordering::SeqCst) {
                return Err(EmbeddingError::InitFailed("network unreachable".to_string()));
            }
            Ok(Arc::new(ConstEmbedder))
        }
    }

    struct PanickingLoader;

    impl ModelLoader for PanickingLoader {
        fn describe(&self) -> String {
            "panicking-loader".to_string()
        }

        fn load(&self) -> Result<Arc<dyn Embedder>, EmbeddingError> {
            panic!("loader blew up");
        }
    }

    struct ShortEmbedder;

    impl Embedder for ShortEmbedder {
        fn dimensions(&self) -> usize {
            1
        }

        fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(vec![vec![1.0]])
        }
    }

    struct ShortLoader;

    impl ModelLoader for ShortLoader {
        fn describe(&self) -> String {
            "short-loader".to_string()
        }

        fn load(&self) -> Result<Arc<dyn Embedder>, EmbeddingError> {
            Ok(Arc::new(ShortEmbedder))
        }
    }

    fn slow_loader(fail_first: bool) -> SlowLoader {
        SlowLoader {
            delay: Duration::from_millis(50),
            fail_first: AtomicBool::new(fail_first),
        }
    }

    #[test]
    fn test_lazy_until_first_use() {
        let provider = EmbeddingProvider::new(slow_loader(false));
        assert_eq!(provider.status(), ProviderStatus::Uninitialized);
        assert_eq!(provider.load_attempts(), 0);

        let out = provider.embed(&["ab".to_string()]).unwrap();
        assert_eq!(out, vec![vec![2.0, 1.0]]);
        assert_eq!(provider.status(), ProviderStatus::Ready { dimensions: 2 });

        provider.embed(&["c".to_string()]).unwrap();
        assert_eq!(provider.load_attempts(), 1);
    }

    #[test]
    fn test_concurrent_first_use_loads_once() {
        let provider = Arc::new(EmbeddingProvider::new(slow_loader(false)));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let provider = provider.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    provider.embed(&["x".repeat(i)])
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let out = handle.join().unwrap().unwrap();
            assert_eq!(out, vec![vec![i as f32, 1.0]]);
        }

        assert_eq!(provider.load_attempts(), 1);
    }

    #[test]
    fn test_failure_is_not_sticky() {
        let provider = EmbeddingProvider::new(slow_loader(true));

        let first = provider.embed(&["a".to_string()]);
        assert!(matches!(first, Err(EmbeddingError::InitFailed(_))));
        assert!(matches!(provider.status(), ProviderStatus::Failed { .. }));

        let second = provider.embed(&["a".to_string()]).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(provider.load_attempts(), 2);
        assert_eq!(provider.status(), ProviderStatus::Ready { dimensions: 2 });
    }

    #[test]
    fn test_concurrent_waiters_share_failure() {
        let provider = Arc::new(EmbeddingProvider::new(SlowLoader {
            delay: Duration::from_millis(200),
            fail_first: AtomicBool::new(true),
        }));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let provider = provider.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    provider.ensure_loaded()
                })
            })
            .collect();

        for handle in handles {
            let result = handle.join().unwrap();
            assert!(matches!(result, Err(EmbeddingError::InitFailed(_))));
        }
        assert_eq!(provider.load_attempts(), 1);

        // a fresh call after the failure retries
        provider.ensure_loaded().unwrap();
        assert_eq!(provider.load_attempts(), 2);
    }

    #[test]
    fn test_loader_panic_resets_state() {
        let provider = Arc::new(EmbeddingProvider::new(PanickingLoader));

        let p = provider.clone();
        let joined = std::thread::spawn(move || p.ensure_loaded()).join();
        assert!(joined.is_err());

        assert_eq!(provider.status(), ProviderStatus::Uninitialized);
    }

    #[test]
    fn test_wrong_embedding_count_is_error() {
        let provider = EmbeddingProvider::new(ShortLoader);
        let result = provider.embed(&["a".to_string(), "b".to_string()]);
        assert!(matches!(result, Err(EmbeddingError::EmbeddingFailed(_))));
    }

    #[test]
    fn test_empty_batch_returns_empty() {
        let provider = EmbeddingProvider::new(ShortLoader);
        assert!(provider.embed(&[]).unwrap().is_empty());
    }
}
