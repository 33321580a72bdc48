//! Image label detection.
//!
//! The default labeler calls the Cloud Vision `images:annotate` REST
//! endpoint with a `LABEL_DETECTION` feature and keeps each annotation's
//! description and score.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::catalog::LabelTag;

pub const DEFAULT_VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

#[derive(thiserror::Error, Debug)]
pub enum LabelError {
    #[error("labeler is not configured: {0}")]
    NotConfigured(String),

    #[error("label request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("labeler returned an error: {0}")]
    Api(String),

    #[error("invalid label {0:?}")]
    Parse(String),
}

pub trait Labeler: Send + Sync {
    fn detect_labels(&self, image: &[u8]) -> Result<Vec<LabelTag>, LabelError>;
}

/// Fixed labels, used when labels are supplied by hand.
#[derive(Debug, Clone, Default)]
pub struct StaticLabeler {
    labels: Vec<LabelTag>,
}

impl StaticLabeler {
    pub fn new(labels: Vec<LabelTag>) -> Self {
        Self { labels }
    }
}

impl Labeler for StaticLabeler {
    fn detect_labels(&self, _image: &[u8]) -> Result<Vec<LabelTag>, LabelError> {
        Ok(self.labels.clone())
    }
}

/// Labeler that reports it has no backend. Ingestion without explicit
/// labels fails with [`LabelError::NotConfigured`].
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredLabeler;

impl Labeler for UnconfiguredLabeler {
    fn detect_labels(&self, _image: &[u8]) -> Result<Vec<LabelTag>, LabelError> {
        Err(LabelError::NotConfigured(
            "set labeler.api_key or PICSIFT_VISION_API_KEY, or pass labels explicitly".to_string(),
        ))
    }
}

pub struct VisionLabeler {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    max_labels: u32,
}

#[derive(Serialize)]
struct AnnotateRequest<'a> {
    requests: Vec<AnnotateImageRequest<'a>>,
}

#[derive(Serialize)]
struct AnnotateImageRequest<'a> {
    image: ImageContent,
    features: Vec<Feature<'a>>,
}

#[derive(Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    max_results: u32,
}

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    label_annotations: Vec<EntityAnnotation>,
    error: Option<ApiStatus>,
}

#[derive(Deserialize)]
struct EntityAnnotation {
    #[serde(default)]
    description: String,
    #[serde(default)]
    score: f32,
}

#[derive(Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: String,
}

impl VisionLabeler {
    pub fn new(endpoint: &str, api_key: &str, max_labels: u32) -> Result<Self, LabelError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            max_labels,
        })
    }

    fn request_body(&self, image: &[u8]) -> AnnotateRequest<'static> {
        AnnotateRequest {
            requests: vec![AnnotateImageRequest {
                image: ImageContent {
                    content: STANDARD.encode(image),
                },
                features: vec![Feature {
                    kind: "LABEL_DETECTION",
                    max_results: self.max_labels,
                }],
            }],
        }
    }
}

fn labels_from_response(response: AnnotateResponse) -> Result<Vec<LabelTag>, LabelError> {
    let first = match response.responses.into_iter().next() {
        Some(first) => first,
        None => return Ok(vec![]),
    };

    if let Some(status) = first.error {
        return Err(LabelError::Api(status.message));
    }

    Ok(first
        .label_annotations
        .into_iter()
        .filter(|annotation| !annotation.description.is_empty())
        .map(|annotation| LabelTag::new(annotation.description, annotation.score))
        .collect())
}

impl Labeler for VisionLabeler {
    fn detect_labels(&self, image: &[u8]) -> Result<Vec<LabelTag>, LabelError> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", &self.api_key)])
            .json(&self.request_body(image))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LabelError::Api(format!("{status}: {body}")));
        }

        let labels = labels_from_response(response.json::<AnnotateResponse>()?)?;
        log::debug!("detected {} labels", labels.len());
        Ok(labels)
    }
}

/// Parse `"cat:0.98,piano:0.9,keys"` into labels. A missing score means 1.0.
pub fn parse_labels(input: &str) -> Result<Vec<LabelTag>, LabelError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| -> Result<LabelTag, LabelError> {
            match part.rsplit_once(':') {
                Some((description, score)) => {
                    let score = score
                        .trim()
                        .parse::<f32>()
                        .ok()
                        .filter(|s| (0.0..=1.0).contains(s))
                        .ok_or_else(|| LabelError::Parse(part.to_string()))?;
                    let description = description.trim();
                    if description.is_empty() {
                        return Err(LabelError::Parse(part.to_string()));
                    }
                    Ok(LabelTag::new(description, score))
                }
                None => Ok(LabelTag::new(part, 1.0)),
            }
        })
        .collect()
}
