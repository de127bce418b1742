// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process shell for the external processor.
//!
//! Owns construction of the shared collaborators (cache, router, metrics)
//! from a loaded config plus an embedder, and runs the tonic server until
//! the cancellation token fires; in-flight streams drain before `run`
//! returns.

use std::sync::Arc;

use anyhow::Result;
use derive_builder::Builder;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::cache::SemanticCache;
use crate::config::RouterConfig;
use crate::embedding::Embedder;
use crate::metrics::Metrics;
use crate::routing::ModelRouter;

use super::proto::ext_proc_v3::external_processor_server::ExternalProcessorServer;
use super::service::ExtProcService;

#[derive(Clone, Builder)]
#[builder(pattern = "owned", build_fn(private, name = "build_internal"))]
pub struct ExtProcServerConfig {
    #[builder(default = "50051")]
    port: u16,

    #[builder(setter(into), default = "String::from(\"0.0.0.0\")")]
    host: String,

    config: Arc<RouterConfig>,

    embedder: Arc<dyn Embedder>,
}

impl ExtProcServerConfigBuilder {
    pub fn build(self) -> Result<ExtProcServer> {
        let config = self.build_internal()?;

        let metrics = Arc::new(Metrics::new());
        let cache = Arc::new(SemanticCache::new(
            config.config.cache_options(),
            config.embedder.clone(),
        ));
        let router = Arc::new(ModelRouter::new(
            config.config.clone(),
            config.embedder.clone(),
        ));
        let service = ExtProcService::new(config.config, router, cache, metrics);

        Ok(ExtProcServer {
            service,
            host: config.host,
            port: config.port,
        })
    }
}

#[derive(Clone)]
pub struct ExtProcServer {
    service: ExtProcService,
    host: String,
    port: u16,
}

impl ExtProcServer {
    pub fn builder() -> ExtProcServerConfigBuilder {
        ExtProcServerConfigBuilder::default()
    }

    /// The semantic cache shared by every stream, e.g. for warm-up.
    pub fn cache(&self) -> Arc<SemanticCache> {
        self.service.cache()
    }

    /// The metrics object shared by every stream, e.g. for export wiring.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.service.metrics()
    }

    pub async fn spawn(&self, cancel_token: CancellationToken) -> JoinHandle<Result<()>> {
        let this = self.clone();
        tokio::spawn(async move { this.run(cancel_token).await })
    }

    /// Bind the configured address and serve until the token is cancelled.
    pub async fn run(&self, cancel_token: CancellationToken) -> Result<()> {
        let address = format!("{}:{}", self.host, self.port);
        tracing::info!(address, "starting ExtProc gRPC service");

        let observer = cancel_token.child_token();
        Server::builder()
            .add_service(ExternalProcessorServer::new(self.service.clone()))
            .serve_with_shutdown(address.parse()?, observer.cancelled_owned())
            .await
            .inspect_err(|_| cancel_token.cancel())?;

        Ok(())
    }

    /// Serve on a pre-bound listener. Lets callers bind port 0 and discover
    /// the address themselves.
    pub async fn run_with_listener(
        &self,
        listener: TcpListener,
        cancel_token: CancellationToken,
    ) -> Result<()> {
        let address = listener.local_addr()?;
        tracing::info!(%address, "starting ExtProc gRPC service");

        let observer = cancel_token.child_token();
        Server::builder()
            .add_service(ExternalProcessorServer::new(self.service.clone()))
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                observer.cancelled_owned(),
            )
            .await
            .inspect_err(|_| cancel_token.cancel())?;

        Ok(())
    }
}
