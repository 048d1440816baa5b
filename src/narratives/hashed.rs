// HashedEmbedder: deterministic bag-of-lemmas vectors by feature hashing.
//
// Each surviving token is hashed with 64-bit FNV-1a; the low bits pick a
// bucket and the top bit a sign, which keeps collisions from biasing every
// dot product upward. Vectors are L2-normalized. No model files, no network,
// identical output on every platform, which also makes it the embedder the
// tests run against.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::embedder::{l2_normalize, DocumentEmbedder};
use crate::corpus::LemmaFilter;

pub const DEFAULT_HASHED_DIM: usize = 512;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

pub struct HashedEmbedder {
    dim: usize,
    filter: Arc<LemmaFilter>,
}

impl HashedEmbedder {
    pub fn new(dim: usize, filter: Arc<LemmaFilter>) -> Self {
        Self {
            dim: dim.max(1),
            filter,
        }
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f64> {
        let mut v = vec![0.0_f64; self.dim];
        let tokens = text
            .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '\''))
            .filter(|t| !t.is_empty());
        for token in tokens {
            let Some(token) = self.filter.normalize(token) else {
                continue;
            };
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dim as u64) as usize;
            let sign = if h >> 63 == 1 { -1.0 } else { 1.0 };
            v[bucket] += sign;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl DocumentEmbedder for HashedEmbedder {
    fn name(&self) -> &'static str {
        "hashed"
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narratives::embedder::cosine_similarity;

    fn embedder() -> HashedEmbedder {
        HashedEmbedder::new(DEFAULT_HASHED_DIM, Arc::new(LemmaFilter::default()))
    }

    #[test]
    fn test_deterministic_and_unit_length() {
        let e = embedder();
        let a = e.embed_one("La réforme des retraites provoque une grève");
        let b = e.embed_one("La réforme des retraites provoque une grève");
        assert_eq!(a, b);
        assert!((a.iter().map(|x| x * x).sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_shared_vocabulary_is_closer() {
        let e = embedder();
        let a = e.embed_one("retraite grève syndicat manifestation");
        let b = e.embed_one("retraite grève syndicat cortège");
        let c = e.embed_one("football coupe stade supporters");
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    fn test_stopwords_only_is_zero_vector() {
        let v = embedder().embed_one("de la et le 2024");
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_embed_batch_keeps_order() {
        let e = embedder();
        let texts = vec!["retraite".to_string(), "football".to_string()];
        let out = e.embed_batch(&texts).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], e.embed_one("retraite"));
        assert_eq!(out[1].len(), e.dimension());
    }
}
