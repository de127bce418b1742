// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! gRPC surface of the external processor.
//!
//! Each `Process` call spawns one task that owns the inbound stream and a
//! fresh [`StreamHandler`]; directives flow back through a bounded channel.
//! Directives keep the ordering of the messages that triggered them, and the
//! gateway never has more than one outstanding per message.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::cache::SemanticCache;
use crate::config::RouterConfig;
use crate::metrics::Metrics;
use crate::routing::ModelRouter;

use super::handler::{
    noop_continue, request_trailers_continue, response_trailers_continue, Directive, StreamHandler,
};
use super::proto::ext_proc_v3::external_processor_server::ExternalProcessor;
use super::proto::ext_proc_v3::{processing_request, ProcessingRequest, ProcessingResponse};

#[derive(Clone)]
pub struct ExtProcService {
    config: Arc<RouterConfig>,
    router: Arc<ModelRouter>,
    cache: Arc<SemanticCache>,
    metrics: Arc<Metrics>,
}

impl ExtProcService {
    pub fn new(
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
        }
    }

    pub fn cache(&self) -> Arc<SemanticCache> {
        self.cache.clone()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }
}

#[tonic::async_trait]
impl ExternalProcessor for ExtProcService {
    type ProcessStream =
        Pin<Box<dyn Stream<Item = Result<ProcessingResponse, Status>> + Send + 'static>>;

    async fn process(
        &self,
        request: Request<Streaming<ProcessingRequest>>,
    ) -> Result<Response<Self::ProcessStream>, Status> {
        let mut in_stream = request.into_inner();
        let (tx, rx) = mpsc::channel::<Result<ProcessingResponse, Status>>(16);

        let mut handler = StreamHandler::new(
            self.config.clone(),
            self.router.clone(),
            self.cache.clone(),
            self.metrics.clone(),
        );

        tokio::spawn(async move {
            tracing::debug!("processing stream opened");
            while let Some(message) = in_stream.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(status) => {
                        tracing::debug!(%status, "stream receive error");
                        break;
                    }
                };

                use processing_request::Request as Msg;
                let directive = match message.request {
                    Some(Msg::RequestHeaders(headers)) => {
                        Directive::Reply(handler.on_request_headers(&headers))
                    }
                    Some(Msg::RequestBody(body)) => match handler.on_request_body(body).await {
                        Ok(directive) => directive,
                        Err(status) => {
                            let _ = tx.send(Err(status)).await;
                            break;
                        }
                    },
                    Some(Msg::ResponseHeaders(_)) => {
                        Directive::Reply(handler.on_response_headers())
                    }
                    Some(Msg::ResponseBody(body)) => {
                        Directive::Reply(handler.on_response_body(body))
                    }
                    Some(Msg::RequestTrailers(_)) => Directive::Reply(request_trailers_continue()),
                    Some(Msg::ResponseTrailers(_)) => {
                        Directive::Reply(response_trailers_continue())
                    }
                    None => Directive::Reply(noop_continue()),
                };

                match directive {
                    Directive::Reply(response) => {
                        if tx.send(Ok(response)).await.is_err() {
                            // Client went away; nothing left to do.
                            break;
                        }
                    }
                    Directive::ReplyAndClose(response) => {
                        let _ = tx.send(Ok(response)).await;
                        break;
                    }
                }
            }
            tracing::debug!("processing stream closed");
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}
