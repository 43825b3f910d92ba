use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peerlock::api;
use peerlock::cli;
use peerlock::node::PeerNode;
use peerlock::registry::StaticRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peerlock=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let settings = cli::Cli::parse().into_settings()?;
    let http_address = settings.http_listen_addr()?;

    let registry = Arc::new(StaticRegistry::new(settings.topology.clone()));
    let node = PeerNode::start(settings, registry).await?;

    // Build Axum Router
    let api = api::api(node.clone());

    // Start server
    info!("Starting peerlock {} on {}", node.peer_id(), http_address);
    let listener = tokio::net::TcpListener::bind(http_address).await?;
    axum::serve(listener, api)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Tell the group we are gone instead of waiting to be evicted
    if let Err(e) = node.leave().await {
        warn!("leaving the group failed: {}", e);
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
