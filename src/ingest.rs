//! Upload → label → catalog pipeline.
//!
//! Only payloads that sniff as images are accepted. The stored object name
//! doubles as the catalog id. If labelling or cataloguing fails the stored
//! object is removed again so storage and catalog don't drift apart.

use crate::{
    app::AppError,
    catalog::{Catalog, Item},
    eid::Eid,
    labeler::Labeler,
    storage::StorageManager,
};

/// Detect the image type of `data`, returning its file extension.
pub fn image_extension(data: &[u8]) -> Option<&'static str> {
    infer::get(data)
        .filter(|kind| kind.mime_type().starts_with("image/"))
        .map(|kind| kind.extension())
}

pub fn ingest_image(
    data: &[u8],
    storage: &dyn StorageManager,
    labeler: &dyn Labeler,
    catalog: &dyn Catalog,
) -> Result<Item, AppError> {
    let extension = image_extension(data).ok_or(AppError::NotAnImage)?;
    let id = Eid::new().object_name(extension);

    storage.write(&id, data)?;

    match label_and_catalog(&id, data, labeler, catalog) {
        Ok(item) => {
            log::info!("ingested {} with {} labels", item.id, item.labels.len());
            Ok(item)
        }
        Err(err) => {
            log::warn!("ingest of {id} failed: {err}");
            if let Err(cleanup) = storage.delete(&id) {
                log::error!("failed to remove orphaned object {id}: {cleanup}");
            }
            Err(err)
        }
    }
}

fn label_and_catalog(
    id: &str,
    data: &[u8],
    labeler: &dyn Labeler,
    catalog: &dyn Catalog,
) -> Result<Item, AppError> {
    let item = Item {
        id: id.to_string(),
        labels: labeler.detect_labels(data)?,
    };
    catalog.add(item.clone())?;
    Ok(item)
}
