//! HTTP status API (axum).
//!
//! Read-only observability endpoints; all state lives in the relay task
//! and is fetched through the query channel.

use std::net::SocketAddr;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::swarm::{PeerSummary, RelayQuery, StatusSnapshot, TopicSummary};

#[derive(Clone)]
pub struct AppState {
    pub query_tx: mpsc::Sender<RelayQuery>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/health", get(health))
        .route("/peers", get(peers))
        .route("/topics", get(topics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Status API listening");
    axum::serve(listener, router).await?;
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    #[serde(flatten)]
    snapshot: StatusSnapshot,
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let snapshot = query(&state.query_tx, RelayQuery::Status).await?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        snapshot,
    }))
}

async fn peers(
    State(state): State<AppState>,
) -> Result<Json<Vec<PeerSummary>>, StatusCode> {
    Ok(Json(query(&state.query_tx, RelayQuery::Peers).await?))
}

async fn topics(
    State(state): State<AppState>,
) -> Result<Json<Vec<TopicSummary>>, StatusCode> {
    Ok(Json(query(&state.query_tx, RelayQuery::Topics).await?))
}

/// Round-trip a query to the relay task; a dead task maps to 503.
async fn query<T>(
    query_tx: &mpsc::Sender<RelayQuery>,
    make: impl FnOnce(oneshot::Sender<T>) -> RelayQuery,
) -> Result<T, StatusCode> {
    let (reply_tx, reply_rx) = oneshot::channel();
    query_tx
        .send(make(reply_tx))
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    reply_rx.await.map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}
