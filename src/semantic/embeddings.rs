//! Embedding model wrapper for fastembed.
//!
//! Provides a high-level interface for generating embeddings:
//! - Model download into a configurable cache directory
//! - Bounded wait on construction (download + ONNX session setup)
//! - Batch embedding generation in a single model call

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use crate::semantic::provider::{Embedder, ModelLoader};

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Model download timed out after {0} seconds")]
    DownloadTimeout(u64),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

impl EmbeddingModel {
    /// Create a new embedding model with the given name.
    ///
    /// The model is downloaded if not cached. Models are cached in the
    /// `models/` subdirectory of `cache_dir`.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(false);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let dimensions = Self::probe_dimensions(&mut model)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    pub fn name(&self) -> &str {
        &self.model_name
    }

    /// Parse model name string to fastembed enum.
    pub fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2)
            }
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15)
            }
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15Q)
            }
            "bge-base-en-v1.5" | "bgebaseenv15" => {
                Ok(fastembed::EmbeddingModel::BGEBaseENV15)
            }
            "bge-base-en-v1.5-q" | "bgebaseenv15q" => {
                Ok(fastembed::EmbeddingModel::BGEBaseENV15Q)
            }
            "bge-large-en-v1.5" | "bgelargeenv15" => {
                Ok(fastembed::EmbeddingModel::BGELargeENV15)
            }
            "bge-large-en-v1.5-q" | "bgelargeenv15q" => {
                Ok(fastembed::EmbeddingModel::BGELargeENV15Q)
            }
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5 (add -q suffix for quantized)",
                name
            ))),
        }
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl Embedder for EmbeddingModel {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }
}

/// A construction running on its own thread.
///
/// A wait that times out leaves the thread running and keeps its receiver, so
/// the next wait resumes on the same construction instead of starting another
/// download into the same cache directory.
pub struct InFlight<T> {
    pending: Mutex<Option<mpsc::Receiver<Result<T, EmbeddingError>>>>,
}

impl<T> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }
}

impl<T: Send + 'static> InFlight<T> {
    /// Wait up to `timeout` for the running construction, starting `build`
    /// on a `model-loader` thread only if none is running.
    pub fn wait<F>(&self, timeout: Duration, build: F) -> Result<T, EmbeddingError>
    where
        F: FnOnce() -> Result<T, EmbeddingError> + Send + 'static,
    {
        let mut pending = self.pending.lock().map_err(|e| {
            EmbeddingError::InitFailed(format!("Loader lock poisoned: {}", e))
        })?;

        let rx = match pending.take() {
            Some(rx) => {
                log::info!("Resuming wait on model construction already in progress");
                rx
            }
            None => {
                let (tx, rx) = mpsc::channel();
                std::thread::Builder::new()
                    .name("model-loader".to_string())
                    .spawn(move || {
                        let _ = tx.send(build());
                    })
                    .map_err(|e| {
                        EmbeddingError::InitFailed(format!("Failed to spawn loader: {}", e))
                    })?;
                rx
            }
        };

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                *pending = Some(rx);
                Err(EmbeddingError::DownloadTimeout(timeout.as_secs()))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
                "Model loader exited without a result".to_string(),
            )),
        }
    }
}

/// Constructs an [`EmbeddingModel`] on demand for the provider.
pub struct FastembedLoader {
    pub model_name: String,
    pub cache_dir: PathBuf,
    pub download_timeout: Duration,
    in_flight: InFlight<EmbeddingModel>,
}

impl FastembedLoader {
    pub fn new(model_name: &str, cache_dir: PathBuf, download_timeout: Option<Duration>) -> Self {
        Self {
            model_name: model_name.to_string(),
            cache_dir,
            download_timeout: download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT),
            in_flight: InFlight::default(),
        }
    }
}

impl ModelLoader for FastembedLoader {
    fn describe(&self) -> String {
        format!("'{}' (cache: {})", self.model_name, self.cache_dir.display())
    }

    fn load(&self) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        // fail fast on typos before spawning a download
        EmbeddingModel::parse_model_name(&self.model_name)?;

        let model_name = self.model_name.clone();
        let cache_dir = self.cache_dir.clone();

        // fastembed has no download timeout of its own
        let model = self.in_flight.wait(self.download_timeout, move || {
            EmbeddingModel::new(&model_name, cache_dir)
        })?;

        log::debug!("Constructed model {}", model.name());
        let model: Arc<dyn Embedder> = Arc::new(model);
        Ok(model)
    }
}
