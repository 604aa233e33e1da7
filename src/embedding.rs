//! Text embeddings for clustering.
//!
//! Deterministic hash-based embeddings: word hashing plus character trigram
//! hashing, normalized to unit length. Not semantic, but papers that share
//! vocabulary land close together, which is what theme clustering needs.
//! The trait seam allows an API-backed embedder to be slotted in.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub const EMBEDDING_DIM: usize = 256;

pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

pub struct HashEmbedder {
    dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        HashEmbedder {
            dimensions: EMBEDDING_DIM,
        }
    }
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        HashEmbedder { dimensions }
    }

    fn hash_str(s: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();
        let words: Vec<&str> = normalized.split_whitespace().collect();

        // Word-level hashing carries the main signal.
        for word in &words {
            let hash = Self::hash_str(word);
            let index = (hash as usize) % self.dimensions;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + ((hash >> 16) & 0xFF) as f32 / 255.0;
            embedding[index] += sign * magnitude;
        }

        // Character trigrams soften exact-vocabulary boundaries.
        for word in &words {
            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                let hash = Self::hash_str(&trigram);
                let index = (hash as usize) % self.dimensions;
                let sign = if (hash >> 32) & 1 == 0 { 0.25 } else { -0.25 };
                embedding[index] += sign;
            }
        }

        normalize(&mut embedding);
        embedding
    }
}

pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_deterministic_and_normalized() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("vision transformers for detection");
        let b = embedder.embed("vision transformers for detection");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn shared_vocabulary_is_closer_than_disjoint() {
        let embedder = HashEmbedder::default();
        let vit1 = embedder.embed("vision transformer image classification");
        let vit2 = embedder.embed("vision transformer object detection");
        let rl = embedder.embed("reinforcement learning reward policy agents");
        assert!(dot(&vit1, &vit2) > dot(&vit1, &rl));
    }
}
