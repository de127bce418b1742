// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! # Semgate Router
//!
//! Inline request router for LLM gateways, implemented as an Envoy
//! external-processor (ExtProc) gRPC service. For each in-flight chat
//! completion it can:
//!
//! - pick the backend model whose task catalog entry is semantically closest
//!   to the conversation context, rewriting the request body in place;
//! - answer from a semantic cache when a sufficiently similar prompt has
//!   already been served, short-circuiting the upstream call entirely;
//! - record per-model request, routing, latency, and token-usage metrics.
//!
//! The heavy lifting lives in four modules: [`embedding`] (the text
//! embedding seam), [`cache`] (the similarity cache), [`routing`] (the model
//! choice), and [`extproc`] (the per-stream protocol state machine plus the
//! gRPC server shell).

pub mod cache;
pub mod config;
pub mod embedding;
pub mod extproc;
pub mod logging;
pub mod metrics;
pub mod protocols;
pub mod routing;

pub use cache::{CacheError, SemanticCache, SemanticCacheOptions};
pub use config::RouterConfig;
pub use embedding::{Embedder, SimilarityMatch};
pub use extproc::ExtProcServer;
pub use metrics::Metrics;
pub use routing::{ModelRouter, RouteDecision};
