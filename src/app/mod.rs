//! Application service: catalog, object storage, labeler and ranking wired
//! together behind the operations the CLI and the HTTP daemon expose.

mod errors;
mod factory;

pub use errors::AppError;
pub use factory::{AppFactory, AppPaths};

use std::sync::Arc;

use crate::{
    catalog::{Catalog, Item, LabelTag},
    ingest,
    labeler::{Labeler, StaticLabeler},
    semantic::{Candidate, ProviderStatus, RankedResult, RankingEngine},
    storage::StorageManager,
};

pub struct App {
    catalog: Arc<dyn Catalog>,
    storage: Arc<dyn StorageManager>,
    labeler: Arc<dyn Labeler>,
    engine: RankingEngine,
}

impl App {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        storage: Arc<dyn StorageManager>,
        labeler: Arc<dyn Labeler>,
        engine: RankingEngine,
    ) -> Self {
        Self {
            catalog,
            storage,
            labeler,
            engine,
        }
    }

    /// Ids of images whose labels match `query`, best match first.
    pub fn search(&self, query: &str) -> Result<Vec<String>, AppError> {
        Ok(self
            .search_scored(query)?
            .into_iter()
            .map(|result| result.id)
            .collect())
    }

    pub fn search_scored(&self, query: &str) -> Result<Vec<RankedResult>, AppError> {
        // snapshot: items added while ranking runs are picked up next request
        let candidates: Vec<Candidate> = self
            .catalog
            .list_all()?
            .iter()
            .map(Candidate::from_item)
            .collect();

        let results = self.engine.rank_scored(query, &candidates)?;
        log::info!(
            "query {:?}: {} of {} images scored above {}",
            query,
            results.len(),
            candidates.len(),
            self.engine.threshold()
        );

        Ok(results)
    }

    /// All image ids in catalog order.
    pub fn list(&self) -> Result<Vec<String>, AppError> {
        Ok(self
            .catalog
            .list_all()?
            .into_iter()
            .map(|item| item.id)
            .collect())
    }

    pub fn item(&self, id: &str) -> Result<Item, AppError> {
        Ok(self.catalog.get(id)?)
    }

    pub fn image(&self, id: &str) -> Result<Vec<u8>, AppError> {
        if !self.storage.exists(id) {
            return Err(AppError::NotFound(id.to_string()));
        }
        Ok(self.storage.read(id)?)
    }

    /// Store and catalog an image. Explicit `labels` bypass the labeler.
    pub fn ingest(&self, data: &[u8], labels: Option<Vec<LabelTag>>) -> Result<Item, AppError> {
        match labels {
            Some(labels) => {
                // reject before anything is written to storage
                for label in &labels {
                    label.validate()?;
                }
                ingest::ingest_image(
                    data,
                    self.storage.as_ref(),
                    &StaticLabeler::new(labels),
                    self.catalog.as_ref(),
                )
            }
            None => ingest::ingest_image(
                data,
                self.storage.as_ref(),
                self.labeler.as_ref(),
                self.catalog.as_ref(),
            ),
        }
    }

    /// Remove an image from the catalog and from storage.
    pub fn delete(&self, id: &str) -> Result<Item, AppError> {
        let item = self.catalog.delete(id)?;
        self.engine.invalidate(id);

        if let Err(err) = self.storage.delete(id) {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(err.into());
            }
            log::warn!("object {id} was already missing from storage");
        }

        log::info!("deleted {id}");
        Ok(item)
    }

    pub fn provider_status(&self) -> ProviderStatus {
        self.engine.provider().status()
    }

    /// Load the embedding model ahead of the first query.
    pub fn warm_up(&self) {
        if let Err(err) = self.engine.provider().ensure_loaded() {
            log::warn!("model warm-up failed, will retry on first query: {err}");
        }
    }
}
