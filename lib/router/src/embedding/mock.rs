// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Deterministic embedder for tests and demos.
//!
//! Texts can be programmed with explicit vectors; everything else falls back
//! to a hashed bag-of-words embedding, so identical strings always land on
//! the same unit vector and token overlap translates into similarity. No
//! model download, no inference latency.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use super::Embedder;

const DEFAULT_DIMENSION: usize = 64;

pub struct MockEmbedder {
    dimension: usize,
    programmed: HashMap<String, Vec<f32>>,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            programmed: HashMap::new(),
        }
    }

    /// Pin `text` to a fixed vector (normalized on insertion). Programmed
    /// vectors must share one dimension, which overrides the default.
    pub fn with_vector(mut self, text: &str, vector: &[f32]) -> Self {
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        let normalized = if norm > 0.0 {
            vector.iter().map(|x| x / norm).collect()
        } else {
            vector.to_vec()
        };
        self.dimension = vector.len();
        self.programmed.insert(text.to_string(), normalized);
        self
    }

    fn bag_of_words(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            vector[(hasher.finish() as usize) % self.dimension] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        if let Some(vector) = self.programmed.get(text) {
            return Ok(vector.clone());
        }
        Ok(self.bag_of_words(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine;

    #[test]
    fn identical_texts_embed_identically() {
        let embedder = MockEmbedder::new();
        let a = embedder.embed("what is the capital of France").unwrap();
        let b = embedder.embed("what is the capital of France").unwrap();
        assert_eq!(a, b);
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn token_overlap_raises_similarity() {
        let embedder = MockEmbedder::new();
        let base = embedder.embed("explain quantum entanglement simply").unwrap();
        let near = embedder.embed("explain quantum entanglement").unwrap();
        let far = embedder.embed("bake sourdough bread").unwrap();
        assert!(cosine(&base, &near) > cosine(&base, &far));
    }

    #[test]
    fn programmed_vectors_are_normalized() {
        let embedder = MockEmbedder::new().with_vector("pinned", &[3.0, 4.0]);
        let v = embedder.embed("pinned").unwrap();
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_text_embeds_to_the_zero_vector() {
        let embedder = MockEmbedder::new();
        let v = embedder.embed("").unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
    }
}
