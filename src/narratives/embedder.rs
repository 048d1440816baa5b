// DocumentEmbedder trait and the vector helpers the clusterer needs.
//
// The clusterer only consumes vectors; where they come from is swappable.
// Implementations: OnnxEmbedder (multilingual sentence transformer, local
// ONNX) and HashedEmbedder (deterministic feature hashing, no model files).

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait DocumentEmbedder: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one unit-length vector per text. An empty text
    /// yields the zero vector.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>>;
}

/// Scale to unit length in place. The zero vector is left alone.
pub fn l2_normalize(v: &mut [f64]) {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > f64::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Component-wise mean of equally sized vectors, normalized to unit length.
pub fn mean_direction(vectors: &[&[f64]], dim: usize) -> Vec<f64> {
    let mut mean = vec![0.0_f64; dim];
    if vectors.is_empty() {
        return mean;
    }
    for v in vectors {
        for (m, x) in mean.iter_mut().zip(v.iter()) {
            *m += x;
        }
    }
    let n = vectors.len() as f64;
    for m in &mut mean {
        *m /= n;
    }
    l2_normalize(&mut mean);
    mean
}

/// Cosine similarity clamped to 0.0..=1.0. Mismatched or zero vectors score 0.0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    let denom = mag_a * mag_b;
    if denom < f64::EPSILON {
        0.0
    } else {
        (dot / denom).clamp(0.0, 1.0)
    }
}

/// `1 − cosine_similarity`, so 0.0 is identical and 1.0 unrelated.
pub fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    1.0 - cosine_similarity(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]) - 1.0).abs() < 1e-10);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-10);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        // Opposite directions clamp to zero similarity.
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_mean_direction_is_unit_length() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        let m = mean_direction(&[&a, &b], 2);
        assert!((m[0] - m[1]).abs() < 1e-12);
        assert!((m.iter().map(|x| x * x).sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(mean_direction(&[], 3), vec![0.0; 3]);
    }
}
