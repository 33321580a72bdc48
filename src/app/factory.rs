use anyhow::{Context, Result};
use homedir::my_home;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    app::App,
    catalog::CatalogCsv,
    config::Config,
    labeler::{Labeler, UnconfiguredLabeler, VisionLabeler},
    semantic::{EmbeddingProvider, FastembedLoader, RankingEngine},
    storage,
};

/// Env var overriding the data directory
pub const BASE_PATH_ENV: &str = "PICSIFT_BASE_PATH";

/// Application factory for creating and configuring application components
pub struct AppFactory;

impl AppFactory {
    /// Build the application from config: CSV catalog, local object store,
    /// the configured labeler, and a lazily loaded fastembed model.
    pub fn create_app(paths: &AppPaths, config: &Config) -> Result<App> {
        let catalog = CatalogCsv::load(&paths.catalog_path).with_context(|| {
            format!("Failed to load catalog {}", paths.catalog_path.display())
        })?;
        let storage = storage::BackendLocal::new(&paths.objects_path)
            .context("Failed to create object storage directory")?;

        let labeler = Self::create_labeler(config)?;

        let ranking = &config.ranking;
        let loader = FastembedLoader::new(
            &ranking.model,
            paths.base_path.clone(),
            Some(Duration::from_secs(ranking.download_timeout_secs)),
        );
        let provider = Arc::new(EmbeddingProvider::new(loader));

        let mut engine = RankingEngine::new(provider).with_threshold(ranking.threshold);
        if ranking.cache_embeddings {
            engine = engine.with_cache();
        }

        Ok(App::new(
            Arc::new(catalog),
            Arc::new(storage),
            labeler,
            engine,
        ))
    }

    fn create_labeler(config: &Config) -> Result<Arc<dyn Labeler>> {
        match config.labeler.resolved_api_key() {
            Some(api_key) => {
                let labeler = VisionLabeler::new(
                    &config.labeler.endpoint,
                    &api_key,
                    config.labeler.max_labels,
                )
                .context("Failed to create vision labeler")?;
                Ok(Arc::new(labeler))
            }
            None => {
                log::info!("No labeler API key configured; labels must be supplied on upload");
                Ok(Arc::new(UnconfiguredLabeler))
            }
        }
    }

    /// Get application paths, creating the base directory
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;

        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths::new(base_path))
    }

    /// Get the base path for the application
    fn get_base_path() -> Result<PathBuf> {
        if let Ok(base_path) = std::env::var(BASE_PATH_ENV) {
            return Ok(PathBuf::from(base_path));
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(home.join(".local/share/picsift"))
    }
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: PathBuf,
    pub catalog_path: PathBuf,
    pub objects_path: PathBuf,
}

impl AppPaths {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            catalog_path: base_path.join("catalog.csv"),
            objects_path: base_path.join("images"),
            base_path,
        }
    }
}
