// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Model choice for a chat completion.
//!
//! The router scores only the non-user side of the conversation (system and
//! assistant turns) against the task catalog: user turns are long, noisy and
//! task-orthogonal, while the surrounding context carries the task framing,
//! so scoring the context keeps routing stable across a long dialogue. When
//! there is no context, or no user turn at all, the router leaves the
//! request untouched.

use std::sync::Arc;

use crate::config::RouterConfig;
use crate::embedding::Embedder;
use crate::protocols::openai::ChatCompletionRequest;

/// Outcome of a routing decision. `model` is always the model the upstream
/// call will effectively use; `routed` says whether that differs from what
/// the client asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub model: String,
    pub routed: bool,
}

pub struct ModelRouter {
    config: Arc<RouterConfig>,
    embedder: Arc<dyn Embedder>,
    task_descriptions: Vec<String>,
}

impl ModelRouter {
    pub fn new(config: Arc<RouterConfig>, embedder: Arc<dyn Embedder>) -> Self {
        let task_descriptions = config.task_descriptions();
        tracing::info!(candidates = task_descriptions.len(), "model router ready");
        Self {
            config,
            embedder,
            task_descriptions,
        }
    }

    pub fn choose_model(&self, request: &ChatCompletionRequest) -> RouteDecision {
        let context = request.non_user_context();
        let user = request.last_user_content();
        if context.is_empty() || user.is_empty() {
            return self.keep(request);
        }

        let matched = match self.embedder.most_similar(&context, &self.task_descriptions) {
            Ok(matched) => matched,
            Err(error) => {
                tracing::warn!(%error, "similarity search failed; falling back to default model");
                None
            }
        };

        let candidate = match matched {
            Some(m) if m.score >= self.config.embed_model.threshold => {
                let model = self.config.model_for_task_index(m.index);
                tracing::debug!(index = m.index, score = m.score, model, "task matched");
                model
            }
            Some(m) => {
                tracing::debug!(score = m.score, "best task below threshold; using default model");
                &self.config.default_model
            }
            None => &self.config.default_model,
        };

        if candidate.is_empty() || candidate == request.model {
            self.keep(request)
        } else {
            RouteDecision {
                model: candidate.to_string(),
                routed: true,
            }
        }
    }

    fn keep(&self, request: &ChatCompletionRequest) -> RouteDecision {
        RouteDecision {
            model: request.model.clone(),
            routed: false,
        }
    }
}
