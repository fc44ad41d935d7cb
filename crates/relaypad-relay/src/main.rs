//! # relaypad-relay
//!
//! Rendezvous node for the relaypad network.
//!
//! This binary provides:
//! - **libp2p circuit relay v2** so that peers behind NAT can reach each
//!   other through this node
//! - **Topic membership tracking** from observed GossipSub subscriptions,
//!   with stale-entry sweeping
//! - **Discovery notifications** on per-peer discovery channels, telling
//!   each peer who shares its topics and how to dial them
//! - **HTTP status API** (axum) for health checks and membership inspection

mod api;
mod config;
mod discovery;
mod identity;
mod ledger;
mod swarm;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,relaypad_relay=debug")),
        )
        .init();

    info!("Starting relaypad relay v{}", env!("CARGO_PKG_VERSION"));

    let config = RelayConfig::from_env();
    info!(?config, "Loaded configuration");

    let keypair = identity::load_or_create_keypair(&config.key_path)?;

    let http_addr = config.http_addr;
    let (relay_peer_id, query_tx) = swarm::spawn_relay(config, keypair).await?;
    info!(peer_id = %relay_peer_id, "Relay running in background");

    let app_state = AppState { query_tx };

    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
