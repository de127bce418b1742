// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-stream protocol state machine.
//!
//! One handler lives exactly as long as its ExtProc stream and owns all
//! transaction state: captured request headers, the cache query, the model
//! the upstream call will use, and the id of the pending cache slot. The
//! request and the response of a transaction traverse the same stream, so
//! the pending-entry correlation needs no shared map and no lock.
//!
//! Every inbound message produces exactly one directive. A cache hit is the
//! only short circuit: it answers with an `ImmediateResponse` and the stream
//! is done.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tonic::Status;

use crate::cache::SemanticCache;
use crate::config::RouterConfig;
use crate::metrics::Metrics;
use crate::protocols::openai::{parse_usage, ChatCompletionRequest};
use crate::routing::ModelRouter;

use super::proto::core_v3::{HeaderValue, HeaderValueOption};
use super::proto::ext_proc_v3::{
    body_mutation, common_response, processing_response, BodyMutation, BodyResponse,
    CommonResponse, HeaderMutation, HeadersResponse, HttpBody, HttpHeaders, ImmediateResponse,
    ProcessingResponse, TrailersResponse,
};
use super::proto::type_v3::{HttpStatus, StatusCode};

/// What the service loop should do with the produced response.
#[derive(Debug)]
pub(crate) enum Directive {
    Reply(ProcessingResponse),
    /// Send the response, then stop consuming this stream.
    ReplyAndClose(ProcessingResponse),
}

pub(crate) struct StreamHandler {
    config: Arc<RouterConfig>,
    router: Arc<ModelRouter>,
    cache: Arc<SemanticCache>,
    metrics: Arc<Metrics>,

    headers: HashMap<String, String>,
    request_id: String,
    query: String,
    selected_model: String,
    pending_cache_id: Option<u64>,
    stream_started: Option<Instant>,
}

impl StreamHandler {
    pub(crate) fn new(
        config: Arc<RouterConfig>,
        router: Arc<ModelRouter>,
        cache: Arc<SemanticCache>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            router,
            cache,
            metrics,
            headers: HashMap::new(),
            request_id: String::new(),
            query: String::new(),
            selected_model: String::new(),
            pending_cache_id: None,
            stream_started: None,
        }
    }

    pub(crate) fn on_request_headers(&mut self, message: &HttpHeaders) -> ProcessingResponse {
        self.stream_started = Some(Instant::now());

        if let Some(map) = &message.headers {
            for header in &map.headers {
                if header.key.eq_ignore_ascii_case("x-request-id") {
                    self.request_id = header.value.clone();
                }
                self.headers.insert(header.key.clone(), header.value.clone());
            }
        }
        tracing::debug!(
            request_id = %self.request_id,
            header_count = self.headers.len(),
            "request headers received"
        );

        wrap(processing_response::Response::RequestHeaders(
            HeadersResponse {
                response: Some(common_continue()),
            },
        ))
    }

    pub(crate) async fn on_request_body(&mut self, message: HttpBody) -> Result<Directive, Status> {
        let route_started = Instant::now();
        let original_body = message.body;

        let mut chat_request = ChatCompletionRequest::parse(&original_body)
            .map_err(|e| Status::invalid_argument(format!("invalid request body: {e}")))?;

        let original_model = chat_request.model.clone();
        tracing::debug!(
            request_id = %self.request_id,
            model = %original_model,
            "request body received"
        );
        self.metrics.record_model_request(&original_model);

        self.query = chat_request.cache_query(self.config.semantic_cache.query_policy);

        if self.cache.is_enabled() && !self.query.is_empty() {
            if let Some(cached) = self.lookup_cache(&original_model).await? {
                tracing::info!(request_id = %self.request_id, "serving cached response");
                return Ok(Directive::ReplyAndClose(cached_response(cached)));
            }
            self.reserve_cache_slot(&original_model, original_body.clone())
                .await;
        }

        let router = self.router.clone();
        let request_snapshot = chat_request.clone();
        let decision = tokio::task::spawn_blocking(move || router.choose_model(&request_snapshot))
            .await
            .map_err(|e| Status::internal(format!("routing task failed: {e}")))?;

        let response = if decision.routed {
            tracing::info!(
                request_id = %self.request_id,
                from = %original_model,
                to = %decision.model,
                "rewriting request model"
            );
            self.metrics
                .record_model_routing(&original_model, &decision.model);
            chat_request.model = decision.model.clone();
            let mutated = chat_request
                .to_bytes()
                .map_err(|e| Status::internal(format!("failed to serialize routed request: {e}")))?;
            routed_body_response(mutated)
        } else {
            wrap(processing_response::Response::RequestBody(BodyResponse {
                response: Some(common_continue()),
            }))
        };

        self.selected_model = decision.model;
        self.metrics
            .record_model_routing_latency(route_started.elapsed().as_secs_f64());
        Ok(Directive::Reply(response))
    }

    pub(crate) fn on_response_headers(&mut self) -> ProcessingResponse {
        tracing::debug!(request_id = %self.request_id, "response headers received");
        wrap(processing_response::Response::ResponseHeaders(
            HeadersResponse {
                response: Some(common_continue()),
            },
        ))
    }

    pub(crate) fn on_response_body(&mut self, message: HttpBody) -> ProcessingResponse {
        let completion_seconds = self
            .stream_started
            .map(|started| started.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let usage = parse_usage(&message.body).unwrap_or_else(|error| {
            tracing::warn!(
                request_id = %self.request_id,
                %error,
                "failed to parse usage from response; recording zeros"
            );
            Default::default()
        });

        if !self.selected_model.is_empty() {
            self.metrics.record_model_tokens(
                &self.selected_model,
                usage.prompt_tokens,
                usage.completion_tokens,
            );
            self.metrics
                .record_model_completion_latency(&self.selected_model, completion_seconds);
        }

        if let Some(cache_id) = self.pending_cache_id.take() {
            if message.body.is_empty() {
                tracing::debug!(cache_id, "empty upstream response; leaving entry pending");
            } else if let Err(error) = self.cache.update_with_response(cache_id, message.body) {
                tracing::warn!(cache_id, %error, "failed to complete cache entry");
            }
        }

        wrap(processing_response::Response::ResponseBody(BodyResponse {
            response: Some(common_continue()),
        }))
    }

    async fn lookup_cache(&self, model: &str) -> Result<Option<Vec<u8>>, Status> {
        let cache = self.cache.clone();
        let model = model.to_string();
        let query = self.query.clone();
        let lookup = tokio::task::spawn_blocking(move || cache.find_similar(&model, &query))
            .await
            .map_err(|e| Status::internal(format!("cache lookup task failed: {e}")))?;
        match lookup {
            Ok(result) => Ok(result),
            Err(error) => {
                tracing::warn!(%error, "cache lookup failed; treating as miss");
                Ok(None)
            }
        }
    }

    async fn reserve_cache_slot(&mut self, model: &str, request_body: Vec<u8>) {
        let cache = self.cache.clone();
        let model = model.to_string();
        let query = self.query.clone();
        let reservation =
            tokio::task::spawn_blocking(move || cache.add_pending(&model, &query, request_body))
                .await;
        match reservation {
            Ok(Ok(cache_id)) => {
                tracing::debug!(request_id = %self.request_id, cache_id, "reserved cache slot");
                self.pending_cache_id = Some(cache_id);
            }
            Ok(Err(error)) => tracing::warn!(%error, "failed to reserve cache slot"),
            Err(error) => tracing::warn!(%error, "cache reservation task failed"),
        }
    }
}

fn wrap(response: processing_response::Response) -> ProcessingResponse {
    ProcessingResponse {
        response: Some(response),
    }
}

fn common_continue() -> CommonResponse {
    CommonResponse {
        status: common_response::ResponseStatus::Continue as i32,
        header_mutation: None,
        body_mutation: None,
    }
}

/// Request-body directive carrying the rewritten JSON. The stale
/// content-length must go with it or the upstream sees a truncated body.
fn routed_body_response(mutated_body: Vec<u8>) -> ProcessingResponse {
    wrap(processing_response::Response::RequestBody(BodyResponse {
        response: Some(CommonResponse {
            status: common_response::ResponseStatus::Continue as i32,
            header_mutation: Some(HeaderMutation {
                set_headers: vec![],
                remove_headers: vec!["content-length".to_string()],
            }),
            body_mutation: Some(BodyMutation {
                mutation: Some(body_mutation::Mutation::Body(mutated_body)),
            }),
        }),
    }))
}

fn cached_response(body: Vec<u8>) -> ProcessingResponse {
    wrap(processing_response::Response::ImmediateResponse(
        ImmediateResponse {
            status: Some(HttpStatus {
                code: StatusCode::Ok as i32,
            }),
            headers: Some(HeaderMutation {
                set_headers: vec![
                    set_header("content-type", "application/json"),
                    set_header("x-cache-hit", "true"),
                ],
                remove_headers: vec![],
            }),
            body,
            details: String::new(),
        },
    ))
}

fn set_header(key: &str, value: &str) -> HeaderValueOption {
    HeaderValueOption {
        header: Some(HeaderValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

pub(crate) fn request_trailers_continue() -> ProcessingResponse {
    wrap(processing_response::Response::RequestTrailers(
        TrailersResponse {
            header_mutation: None,
        },
    ))
}

pub(crate) fn response_trailers_continue() -> ProcessingResponse {
    wrap(processing_response::Response::ResponseTrailers(
        TrailersResponse {
            header_mutation: None,
        },
    ))
}

/// Answer for a message kind this processor does not act on.
pub(crate) fn noop_continue() -> ProcessingResponse {
    wrap(processing_response::Response::RequestBody(BodyResponse {
        response: Some(common_continue()),
    }))
}
