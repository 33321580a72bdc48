use crate::{catalog::CatalogError, labeler::LabelError, semantic::RankError};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("image already exists: {0}")]
    AlreadyExists(String),

    #[error("uploaded file is not an image")]
    NotAnImage,

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("{0}")]
    Rank(#[from] RankError),

    #[error("catalog error: {0}")]
    Catalog(CatalogError),

    #[error("{0}")]
    Label(#[from] LabelError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("Base64: {0:?}")]
    Base64(#[from] base64::DecodeError),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(id) => AppError::NotFound(id),
            CatalogError::AlreadyExists(id) => AppError::AlreadyExists(id),
            CatalogError::Invalid(reason) => AppError::Invalid(reason),
            err => AppError::Catalog(err),
        }
    }
}
