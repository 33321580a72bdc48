//! Durable store of labelled image records.
//!
//! The CSV layout has one row per label (`id,description,score`). Rows of one
//! item are contiguous and keep label order; an item without labels is a
//! single row with an empty description. Item order in the file is insertion
//! order, which is also the candidate order handed to ranking.

use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Instant,
};

use crate::eid::Eid;

/// A single detected concept and the annotator's confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelTag {
    pub description: String,
    pub score: f32,
}

impl LabelTag {
    pub fn new(description: impl Into<String>, score: f32) -> Self {
        Self {
            description: description.into(),
            score,
        }
    }

    /// A label needs a non-blank description and a score in `[0, 1]`.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.description.trim().is_empty() {
            return Err(CatalogError::Invalid("label description is empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.score) {
            return Err(CatalogError::Invalid(format!(
                "label {:?} has score {} outside [0, 1]",
                self.description, self.score
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub labels: Vec<LabelTag>,
}

impl Item {
    /// Label descriptions joined with single spaces, in label order.
    pub fn label_text(&self) -> String {
        self.labels
            .iter()
            .map(|label| label.description.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("item not found: {0}")]
    NotFound(String),

    #[error("item already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid item: {0}")]
    Invalid(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    IO(#[from] std::io::Error),

    #[error("catalog lock poisoned")]
    Poisoned,
}

pub trait Catalog: Send + Sync {
    fn list_all(&self) -> Result<Vec<Item>, CatalogError>;
    fn get(&self, id: &str) -> Result<Item, CatalogError>;
    fn add(&self, item: Item) -> Result<(), CatalogError>;
    fn delete(&self, id: &str) -> Result<Item, CatalogError>;
}

const CSV_HEADERS: [&str; 3] = ["id", "description", "score"];

#[derive(Debug, Clone)]
pub struct CatalogCsv {
    list: Arc<RwLock<Vec<Item>>>,
    path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct LabelRow {
    id: String,
    description: String,
    score: Option<f32>,
}

impl CatalogCsv {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();

        if let Err(err) = std::fs::metadata(&path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("Creating new catalog at {}", path.display());
                    let mut csv_wrt = csv::Writer::from_path(&path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => Err(err)?,
            }
        }

        let now = Instant::now();
        let mut csv_reader = csv::Reader::from_path(&path)?;

        let mut items: Vec<Item> = vec![];
        for row in csv_reader.deserialize::<LabelRow>() {
            let row = row?;

            let continues_last = items
                .last()
                .map(|last| last.id == row.id)
                .unwrap_or(false);

            if !continues_last {
                if items.iter().any(|item| item.id == row.id) {
                    return Err(CatalogError::Invalid(format!(
                        "rows for item {} are not contiguous",
                        row.id
                    )));
                }
                items.push(Item {
                    id: row.id.clone(),
                    labels: vec![],
                });
            }

            if let (false, Some(item)) = (row.description.is_empty(), items.last_mut()) {
                item.labels
                    .push(LabelTag::new(row.description, row.score.unwrap_or(0.0)));
            }
        }

        log::info!(
            "Loaded {} items from {} in {:?}",
            items.len(),
            path.display(),
            now.elapsed()
        );

        Ok(Self {
            list: Arc::new(RwLock::new(items)),
            path,
        })
    }

    fn save(&self, items: &[Item]) -> Result<(), CatalogError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let temp_path = dir.join(format!(".catalog-{}.csv", Eid::new()));

        let mut csv_wrt = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&temp_path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for item in items {
            if item.labels.is_empty() {
                csv_wrt.serialize(LabelRow {
                    id: item.id.clone(),
                    description: String::new(),
                    score: None,
                })?;
                continue;
            }

            for label in &item.labels {
                csv_wrt.serialize(LabelRow {
                    id: item.id.clone(),
                    description: label.description.clone(),
                    score: Some(label.score),
                })?;
            }
        }
        csv_wrt.flush()?;
        drop(csv_wrt);

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl Catalog for CatalogCsv {
    fn list_all(&self) -> Result<Vec<Item>, CatalogError> {
        let list = self.list.read().map_err(|_| CatalogError::Poisoned)?;
        Ok(list.clone())
    }

    fn get(&self, id: &str) -> Result<Item, CatalogError> {
        let list = self.list.read().map_err(|_| CatalogError::Poisoned)?;
        list.iter()
            .find(|item| item.id == id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    fn add(&self, item: Item) -> Result<(), CatalogError> {
        if item.id.is_empty() {
            return Err(CatalogError::Invalid("item id is empty".to_string()));
        }
        for label in &item.labels {
            label.validate()?;
        }

        let mut list = self.list.write().map_err(|_| CatalogError::Poisoned)?;
        if list.iter().any(|existing| existing.id == item.id) {
            return Err(CatalogError::AlreadyExists(item.id));
        }

        list.push(item);
        if let Err(err) = self.save(&list) {
            list.pop();
            return Err(err);
        }

        Ok(())
    }

    fn delete(&self, id: &str) -> Result<Item, CatalogError> {
        let mut list = self.list.write().map_err(|_| CatalogError::Poisoned)?;
        let idx = list
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;

        let removed = list.remove(idx);
        if let Err(err) = self.save(&list) {
            list.insert(idx, removed);
            return Err(err);
        }

        Ok(removed)
    }
}
