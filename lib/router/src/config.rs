// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Router configuration.
//!
//! A single YAML document loaded once at startup. It names the embedding
//! model, the fallback backend, the semantic cache settings, and the task
//! catalog: categories group tasks, each task contributes one routing
//! candidate string, and the enclosing category names the backend model that
//! candidate routes to.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::cache::SemanticCacheOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    pub embed_model: EmbedModelConfig,
    /// Backend used when no task candidate clears the threshold.
    pub default_model: String,
    #[serde(default)]
    pub semantic_cache: SemanticCacheConfig,
    #[serde(default)]
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbedModelConfig {
    /// HuggingFace model id of the sentence embedding model.
    pub model_id: String,
    /// Minimum similarity for a task candidate to win routing.
    #[serde(default = "default_embed_threshold")]
    pub threshold: f32,
    /// Force CPU inference even when a GPU is available.
    #[serde(default)]
    pub use_cpu: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SemanticCacheConfig {
    pub enabled: bool,
    /// Minimum similarity for a cached response to be served.
    pub similarity_threshold: f32,
    /// Entry bound across all models; 0 disables the bound.
    pub max_entries: usize,
    /// Seconds until an entry expires; 0 disables expiry.
    pub ttl_seconds: u64,
    /// Which user turns form the cache key.
    pub query_policy: QueryPolicy,
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            similarity_threshold: default_cache_threshold(),
            max_entries: 0,
            ttl_seconds: 0,
            query_policy: QueryPolicy::default(),
        }
    }
}

/// Which part of the conversation is embedded as the cache key. Multi-turn
/// conversations are ambiguous; the policy is explicit rather than implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPolicy {
    /// Only the content of the last `user` message.
    #[default]
    LastUserMessage,
    /// All `user` message contents, joined by single spaces.
    JoinUserMessages,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Backend model every task in this category routes to.
    pub model: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Routing candidate; falls back to `description` when absent.
    #[serde(default)]
    pub typical_prompt: Option<String>,
}

fn default_embed_threshold() -> f32 {
    0.6
}

fn default_cache_threshold() -> f32 {
    0.9
}

impl RouterConfig {
    /// Load and validate a configuration file. Any failure here is fatal to
    /// startup.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.default_model.is_empty() {
            bail!("default_model must not be empty");
        }
        if self.embed_model.model_id.is_empty() {
            bail!("embed_model.model_id must not be empty");
        }
        if !(0.0..=1.0).contains(&self.embed_model.threshold) {
            bail!(
                "embed_model.threshold must be within [0, 1], got {}",
                self.embed_model.threshold
            );
        }
        if !(0.0..=1.0).contains(&self.semantic_cache.similarity_threshold) {
            bail!(
                "semantic_cache.similarity_threshold must be within [0, 1], got {}",
                self.semantic_cache.similarity_threshold
            );
        }
        for category in &self.categories {
            if category.model.is_empty() {
                bail!("category {:?} has an empty model", category.name);
            }
            for task in &category.tasks {
                if task.routing_candidate().is_empty() {
                    bail!(
                        "task {:?} in category {:?} needs a typical_prompt or description",
                        task.name,
                        category.name
                    );
                }
            }
        }
        Ok(())
    }

    /// Candidate strings handed to the embedder, flattened across categories
    /// in declaration order. Stable for the process lifetime.
    pub fn task_descriptions(&self) -> Vec<String> {
        self.categories
            .iter()
            .flat_map(|c| c.tasks.iter())
            .map(|t| t.routing_candidate().to_string())
            .collect()
    }

    /// Backend model for the task at flattened index `index`; out-of-range
    /// indices resolve to the default model.
    pub fn model_for_task_index(&self, index: usize) -> &str {
        self.categories
            .iter()
            .flat_map(|c| c.tasks.iter().map(move |_| c.model.as_str()))
            .nth(index)
            .unwrap_or(&self.default_model)
    }

    pub fn cache_options(&self) -> SemanticCacheOptions {
        let cache = &self.semantic_cache;
        SemanticCacheOptions {
            enabled: cache.enabled,
            similarity_threshold: cache.similarity_threshold,
            max_entries: cache.max_entries,
            ttl: (cache.ttl_seconds > 0).then(|| Duration::from_secs(cache.ttl_seconds)),
        }
    }
}

impl Task {
    fn routing_candidate(&self) -> &str {
        match self.typical_prompt.as_deref() {
            Some(prompt) if !prompt.is_empty() => prompt,
            _ => &self.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    const FULL_CONFIG: &str = r#"
embed_model:
  model_id: sentence-transformers/all-MiniLM-L6-v2
  threshold: 0.55
  use_cpu: true
default_model: general-7b
semantic_cache:
  enabled: true
  similarity_threshold: 0.92
  max_entries: 500
  ttl_seconds: 600
categories:
  - name: science
    description: scientific explanations
    model: physics-70b
    tasks:
      - name: explain
        description: explain a physical phenomenon
        typical_prompt: explain physics clearly
      - name: derive
        description: derive an equation step by step
  - name: coding
    model: coder-34b
    tasks:
      - name: implement
        description: write a program
"#;

    fn parse(yaml: &str) -> RouterConfig {
        let config: RouterConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn parses_full_document() {
        let config = parse(FULL_CONFIG);
        assert_eq!(config.default_model, "general-7b");
        assert_eq!(config.embed_model.threshold, 0.55);
        assert!(config.embed_model.use_cpu);
        assert!(config.semantic_cache.enabled);
        assert_eq!(config.semantic_cache.max_entries, 500);
        assert_eq!(
            config.semantic_cache.query_policy,
            QueryPolicy::LastUserMessage
        );
    }

    #[test]
    fn task_descriptions_flatten_with_fallback() {
        let config = parse(FULL_CONFIG);
        assert_eq!(
            config.task_descriptions(),
            vec![
                "explain physics clearly",
                "derive an equation step by step",
                "write a program",
            ]
        );
    }

    #[test]
    fn model_for_task_index_follows_flattened_order() {
        let config = parse(FULL_CONFIG);
        assert_eq!(config.model_for_task_index(0), "physics-70b");
        assert_eq!(config.model_for_task_index(1), "physics-70b");
        assert_eq!(config.model_for_task_index(2), "coder-34b");
        assert_eq!(config.model_for_task_index(3), "general-7b");
    }

    #[test]
    fn cache_options_translate_zero_ttl_to_none() {
        let mut config = parse(FULL_CONFIG);
        config.semantic_cache.ttl_seconds = 0;
        assert!(config.cache_options().ttl.is_none());
        config.semantic_cache.ttl_seconds = 600;
        assert_eq!(
            config.cache_options().ttl,
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn defaults_apply_when_sections_are_omitted() {
        let config: RouterConfig = serde_yaml::from_str(
            r#"
embed_model:
  model_id: some/model
default_model: general-7b
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert!(!config.semantic_cache.enabled);
        assert_eq!(config.embed_model.threshold, 0.6);
        assert_eq!(config.semantic_cache.similarity_threshold, 0.9);
        assert!(config.task_descriptions().is_empty());
        assert_eq!(config.model_for_task_index(0), "general-7b");
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let config: RouterConfig = serde_yaml::from_str(
            r#"
embed_model:
  model_id: some/model
  threshold: 1.5
default_model: general-7b
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_task_without_candidate_text() {
        let config: RouterConfig = serde_yaml::from_str(
            r#"
embed_model:
  model_id: some/model
default_model: general-7b
categories:
  - name: broken
    model: m
    tasks:
      - name: nameless
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_from_disk_and_reports_missing_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL_CONFIG.as_bytes()).unwrap();
        let config = RouterConfig::load(file.path()).unwrap();
        assert_eq!(config.default_model, "general-7b");

        assert!(RouterConfig::load("/nonexistent/semgate.yaml").is_err());
    }

    #[test]
    fn query_policy_parses_from_snake_case() {
        let config: RouterConfig = serde_yaml::from_str(
            r#"
embed_model:
  model_id: some/model
default_model: general-7b
semantic_cache:
  enabled: true
  query_policy: join_user_messages
"#,
        )
        .unwrap();
        assert_eq!(
            config.semantic_cache.query_policy,
            QueryPolicy::JoinUserMessages
        );
    }
}
