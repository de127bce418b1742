// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Text embedding seam.
//!
//! Everything downstream (routing, semantic cache) speaks to an [`Embedder`]
//! trait object: embed a string into an L2-normalized vector, or rank a
//! candidate list by cosine similarity. The production backend is a candle
//! BERT model behind the `bert-embedder` feature; [`mock::MockEmbedder`]
//! provides a deterministic stand-in.

pub mod mock;

pub mod bert;

use std::sync::Arc;

use crate::config::EmbedModelConfig;

/// Best candidate found by [`Embedder::most_similar`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityMatch {
    /// Position in the candidate slice.
    pub index: usize,
    /// Cosine similarity in [-1, 1].
    pub score: f32,
}

/// A sentence embedding model. Implementations are shared process-wide and
/// may block on inference; callers that live on an async runtime are
/// expected to move calls onto the blocking pool.
pub trait Embedder: Send + Sync {
    /// Embed `text` into a unit vector of the model's fixed dimension.
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Rank `candidates` by cosine similarity against `query` and return the
    /// best one, or `None` when the list is empty. Ties resolve to the
    /// lowest index. Implementations may batch or memoize.
    fn most_similar(
        &self,
        query: &str,
        candidates: &[String],
    ) -> anyhow::Result<Option<SimilarityMatch>> {
        if candidates.is_empty() {
            return Ok(None);
        }
        let query_embedding = self.embed(query)?;
        let mut best: Option<SimilarityMatch> = None;
        for (index, candidate) in candidates.iter().enumerate() {
            let score = cosine(&query_embedding, &self.embed(candidate)?);
            if best.map_or(true, |b| score > b.score) {
                best = Some(SimilarityMatch { index, score });
            }
        }
        Ok(best)
    }
}

/// Cosine similarity of two unit vectors, i.e. their dot product. NaN (a
/// degenerate embedding) is treated as no similarity at all.
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    if dot.is_nan() {
        0.0
    } else {
        dot
    }
}

/// Construct the configured embedding backend.
///
/// # Errors
/// * Feature not compiled in
/// * Model download or load failure
pub fn create_embedder(config: &EmbedModelConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    #[cfg(feature = "bert-embedder")]
    {
        tracing::info!(
            model_id = %config.model_id,
            use_cpu = config.use_cpu,
            "creating BERT embedder"
        );
        let embedder = bert::BertEmbedder::from_pretrained(&config.model_id, config.use_cpu)?;
        Ok(Arc::new(embedder))
    }
    #[cfg(not(feature = "bert-embedder"))]
    {
        let _ = config;
        Err(anyhow::anyhow!(
            "embedding model support requires the 'bert-embedder' feature"
        ))
    }
}
