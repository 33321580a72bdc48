//! Cosine similarity between embedding vectors.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimilarityError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Similarity is not a finite number")]
    NonFinite,
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity in `[-1, 1]`.
///
/// A zero-norm vector has no direction and scores `0.0` against anything.
/// Vectors of different length or containing NaN/inf are an error rather
/// than a score, so "unrelated" and "broken" stay distinguishable.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }

    let a_norm = l2_norm(a);
    let b_norm = l2_norm(b);
    if !a_norm.is_finite() || !b_norm.is_finite() {
        return Err(SimilarityError::NonFinite);
    }
    if a_norm < f32::EPSILON || b_norm < f32::EPSILON {
        return Ok(0.0);
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let score = dot_product / (a_norm * b_norm);
    if !score.is_finite() {
        return Err(SimilarityError::NonFinite);
    }

    Ok(score.clamp(-1.0, 1.0))
}
