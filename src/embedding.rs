//! Embedding capability: text in, unit-normalized vectors out.
//!
//! The [`Embedder`] trait is the seam used by the retriever, the ingest
//! pipeline, and the reindex utility; tests substitute a deterministic fake.
//! The production implementation is [`HttpEmbedder`], a thin client for a
//! text-embeddings-inference style service (`POST /embed {"inputs": [...]}`).
//!
//! Vectors are L2-normalized client-side so that cosine similarity reduces to
//! an inner product in the vector index.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let vectors = self.embed(&texts).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }

    /// Output dimensionality; must match the vector index's configured
    /// dimension.
    fn dims(&self) -> usize;
}

/// HTTP client for an embedding inference service.
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    dims: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            dims: config.dims,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({ "inputs": texts });
        let resp = self.client.post(&self.url).json(&body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            bail!("Embedding service error {}: {}", status, body_text);
        }

        let mut vectors: Vec<Vec<f32>> = resp.json().await?;
        if vectors.len() != texts.len() {
            bail!(
                "Embedding service returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        for v in &mut vectors {
            if v.len() != self.dims {
                bail!(
                    "Embedding dimension mismatch: got {}, expected {}",
                    v.len(),
                    self.dims
                );
            }
            normalize(v);
        }
        Ok(vectors)
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Inner product of two equal-length vectors; 0.0 on length mismatch.
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        let mut v = vec![0.0, 0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn inner_product_of_normalized_equals_cosine() {
        let mut a = vec![1.0, 2.0, 3.0];
        let mut b = vec![1.0, 2.0, 3.0];
        normalize(&mut a);
        normalize(&mut b);
        assert!((inner_product(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn inner_product_length_mismatch_is_zero() {
        assert_eq!(inner_product(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
