// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! BERT sentence embedder on candle.
//!
//! Loads a safetensors model straight from the HuggingFace Hub; pure Rust,
//! CPU or CUDA. The CLS-token hidden state, L2-normalized, is the sentence
//! embedding. One instance owns the model for the whole process; construct
//! it once at startup and share it behind an `Arc`.

use super::Embedder;

#[cfg(feature = "bert-embedder")]
use anyhow::{anyhow, Context as _};
#[cfg(not(feature = "bert-embedder"))]
use anyhow::anyhow;

#[cfg(feature = "bert-embedder")]
use std::collections::HashMap;

#[cfg(feature = "bert-embedder")]
use candle_core::{DType, Device, Tensor};
#[cfg(feature = "bert-embedder")]
use candle_nn::VarBuilder;
#[cfg(feature = "bert-embedder")]
use candle_transformers::models::bert::{BertModel, Config as BertConfig, HiddenAct, DTYPE};
#[cfg(feature = "bert-embedder")]
use hf_hub::{api::sync::Api, Repo, RepoType};
#[cfg(feature = "bert-embedder")]
use parking_lot::RwLock;
#[cfg(feature = "bert-embedder")]
use tokenizers::Tokenizer;

#[cfg(feature = "bert-embedder")]
pub struct BertEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
    // Routing candidates are stable for the process lifetime, so their
    // embeddings are computed once and reused across most_similar calls.
    memoized: RwLock<HashMap<String, Vec<f32>>>,
}

#[cfg(feature = "bert-embedder")]
impl BertEmbedder {
    /// Download and load `model_id` from the HuggingFace Hub. With
    /// `use_cpu` unset the first CUDA device is used when present.
    pub fn from_pretrained(model_id: &str, use_cpu: bool) -> anyhow::Result<Self> {
        let device = if use_cpu {
            Device::Cpu
        } else {
            Device::cuda_if_available(0)?
        };

        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
        let (config_filename, tokenizer_filename, weights_filename) = {
            let api = Api::new()?.repo(repo);
            (
                api.get("config.json")?,
                api.get("tokenizer.json")?,
                api.get("model.safetensors")?,
            )
        };

        let config_str = std::fs::read_to_string(&config_filename)
            .with_context(|| format!("failed to read {}", config_filename.display()))?;
        let mut config: BertConfig = serde_json::from_str(&config_str)?;
        // Approximate GELU trades a little accuracy for throughput.
        config.hidden_act = HiddenAct::GeluApproximate;
        let dimension = config.hidden_size;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("failed to load tokenizer: {e}"))?;

        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)? };
        let model = BertModel::load(vb, &config)?;

        tracing::info!(model_id, dimension, device = ?device, "BERT embedder ready");

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension,
            memoized: RwLock::new(HashMap::new()),
        })
    }

    /// Embedding dimension D of this model.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_uncached(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("tokenization failed: {e}"))?;

        let token_ids = encoding.get_ids().to_vec();
        let token_ids = Tensor::new(&token_ids[..], &self.device)?.unsqueeze(0)?;
        let token_type_ids = token_ids.zeros_like()?;

        let hidden = self.model.forward(&token_ids, &token_type_ids, None)?;

        // CLS token hidden state as the sentence representation.
        let cls = hidden.narrow(1, 0, 1)?.squeeze(1)?;
        let cls = cls.to_dtype(DType::F32)?;

        let norm = cls.sqr()?.sum_all()?.sqrt()?;
        let normalized = cls.broadcast_div(&norm)?;

        Ok(normalized.squeeze(0)?.to_vec1::<f32>()?)
    }

    fn embed_memoized(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        if let Some(vector) = self.memoized.read().get(text) {
            return Ok(vector.clone());
        }
        let vector = self.embed_uncached(text)?;
        self.memoized
            .write()
            .insert(text.to_string(), vector.clone());
        Ok(vector)
    }
}

#[cfg(feature = "bert-embedder")]
impl Embedder for BertEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_uncached(text)
    }

    fn most_similar(
        &self,
        query: &str,
        candidates: &[String],
    ) -> anyhow::Result<Option<super::SimilarityMatch>> {
        if candidates.is_empty() {
            return Ok(None);
        }
        let query_embedding = self.embed_uncached(query)?;
        let mut best: Option<super::SimilarityMatch> = None;
        for (index, candidate) in candidates.iter().enumerate() {
            let score = super::cosine(&query_embedding, &self.embed_memoized(candidate)?);
            if best.map_or(true, |b| score > b.score) {
                best = Some(super::SimilarityMatch { index, score });
            }
        }
        Ok(best)
    }
}

// Placeholder when the feature is not enabled, mirroring the factory error.
#[cfg(not(feature = "bert-embedder"))]
pub struct BertEmbedder;

#[cfg(not(feature = "bert-embedder"))]
impl BertEmbedder {
    pub fn from_pretrained(_model_id: &str, _use_cpu: bool) -> anyhow::Result<Self> {
        Err(anyhow!(
            "BertEmbedder requires the 'bert-embedder' feature"
        ))
    }
}

#[cfg(not(feature = "bert-embedder"))]
impl Embedder for BertEmbedder {
    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        Err(anyhow!(
            "BertEmbedder requires the 'bert-embedder' feature"
        ))
    }
}
