//! Embedding blob (de)serialization and cosine similarity.
//!
//! Vectors are stored as little-endian packed float32 sequences. Unlike a
//! bounded similarity score, cosine here is left unclamped: identical
//! non-zero vectors score 1, orthogonal vectors score 0, antiparallel
//! vectors score -1, and any vector paired with an all-zero vector scores 0.

/// Pack a float32 vector into little-endian bytes for storage.
pub fn vector_to_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Unpack a little-endian float32 blob. Returns `None` if the length isn't
/// a multiple of 4 bytes.
pub fn blob_to_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Cosine similarity between two vectors of equal length.
/// Returns `None` if the lengths differ (mismatched embedding dimensions
/// are skipped by callers, not treated as an error).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_blob() {
        let v = vec![1.0f32, -2.5, 0.0, 3.333];
        let blob = vector_to_blob(&v);
        assert_eq!(blob.len(), v.len() * 4);
        assert_eq!(blob_to_vector(&blob).unwrap(), v);
    }

    #[test]
    fn mismatched_blob_length_is_none() {
        assert!(blob_to_vector(&[1, 2, 3]).is_none());
    }

    #[test]
    fn identical_vectors_score_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).unwrap().abs() < 1e-9);
    }

    #[test]
    fn antiparallel_vectors_score_negative_one() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-1.0, -2.0, -3.0];
        assert!((cosine_similarity(&a, &b).unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_vector_scores_zero() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn mismatched_length_is_none() {
        assert!(cosine_similarity(&[1.0, 2.0], &[1.0]).is_none());
    }
}
