// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use semgate_router::{embedding, logging, ExtProcServer, RouterConfig};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the routing configuration file
    #[arg(long)]
    config: PathBuf,

    /// Host for the ExtProc gRPC service
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port for the ExtProc gRPC service
    #[arg(short, long, default_value = "50051")]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let args = Args::parse();

    let config = Arc::new(RouterConfig::load(&args.config)?);
    let embedder = embedding::create_embedder(&config.embed_model)?;

    let server = ExtProcServer::builder()
        .host(args.host)
        .port(args.port)
        .config(config)
        .embedder(embedder)
        .build()?;

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received; draining in-flight streams");
        signal_token.cancel();
    });

    server.run(cancel_token).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
