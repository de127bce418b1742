// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-model observability counters.
//!
//! One [`Metrics`] object owns its `prometheus::Registry` and is shared by
//! every stream handler behind an `Arc`; nothing registers into the global
//! default registry. Recording never fails observably. Scrape/export wiring
//! is left to the embedding process; the registry is exposed for it.

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
};

const TOKEN_KIND_PROMPT: &str = "prompt";
const TOKEN_KIND_COMPLETION: &str = "completion";

pub struct Metrics {
    registry: Registry,
    model_requests: IntCounterVec,
    routing_changes: IntCounterVec,
    routing_latency: Histogram,
    completion_latency: HistogramVec,
    model_tokens: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let model_requests = IntCounterVec::new(
            Opts::new(
                "semgate_model_requests_total",
                "Chat completion requests seen, labelled by the client's requested model",
            ),
            &["model"],
        )
        .expect("valid metric definition");

        let routing_changes = IntCounterVec::new(
            Opts::new(
                "semgate_model_routing_changes_total",
                "Requests whose model was rewritten by routing",
            ),
            &["from_model", "to_model"],
        )
        .expect("valid metric definition");

        let routing_latency = Histogram::with_opts(HistogramOpts::new(
            "semgate_routing_latency_seconds",
            "Time spent deciding and rewriting a request body",
        ))
        .expect("valid metric definition");

        let completion_latency = HistogramVec::new(
            HistogramOpts::new(
                "semgate_completion_latency_seconds",
                "Wall time from request headers to upstream response body",
            ),
            &["model"],
        )
        .expect("valid metric definition");

        let model_tokens = IntCounterVec::new(
            Opts::new(
                "semgate_model_tokens_total",
                "Token usage reported by the upstream backend",
            ),
            &["model", "kind"],
        )
        .expect("valid metric definition");

        for collector in [
            Box::new(model_requests.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(routing_changes.clone()),
            Box::new(routing_latency.clone()),
            Box::new(completion_latency.clone()),
            Box::new(model_tokens.clone()),
        ] {
            registry.register(collector).expect("fresh registry");
        }

        Self {
            registry,
            model_requests,
            routing_changes,
            routing_latency,
            completion_latency,
            model_tokens,
        }
    }

    /// The registry holding every semgate instrument, for export wiring.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_model_request(&self, model: &str) {
        self.model_requests.with_label_values(&[model]).inc();
    }

    pub fn record_model_routing(&self, from_model: &str, to_model: &str) {
        self.routing_changes
            .with_label_values(&[from_model, to_model])
            .inc();
    }

    pub fn record_model_routing_latency(&self, seconds: f64) {
        self.routing_latency.observe(seconds);
    }

    pub fn record_model_completion_latency(&self, model: &str, seconds: f64) {
        self.completion_latency
            .with_label_values(&[model])
            .observe(seconds);
    }

    pub fn record_model_tokens(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) {
        self.model_tokens
            .with_label_values(&[model, TOKEN_KIND_PROMPT])
            .inc_by(prompt_tokens);
        self.model_tokens
            .with_label_values(&[model, TOKEN_KIND_COMPLETION])
            .inc_by(completion_tokens);
    }

    // Read accessors used by tests.

    pub fn model_request_count(&self, model: &str) -> u64 {
        self.model_requests.with_label_values(&[model]).get()
    }

    pub fn routing_change_count(&self, from_model: &str, to_model: &str) -> u64 {
        self.routing_changes
            .with_label_values(&[from_model, to_model])
            .get()
    }

    pub fn token_count(&self, model: &str, kind: &str) -> u64 {
        self.model_tokens.with_label_values(&[model, kind]).get()
    }

    pub fn completion_latency_samples(&self, model: &str) -> u64 {
        self.completion_latency
            .with_label_values(&[model])
            .get_sample_count()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
