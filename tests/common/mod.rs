use anyhow::Result;
use async_trait::async_trait;
use kb_harness::embedding::BulkEmbedder;
use sha2::{Digest, Sha256};

/// Offline stand-in for a real embedding model: each word is hashed into a
/// bucket, so texts sharing words land close together.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket = u16::from_le_bytes([digest[0], digest[1]]) as usize % self.dims;
            v[bucket] += 1.0;
        }
        v
    }
}

#[async_trait]
impl BulkEmbedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}
