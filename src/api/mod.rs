//! The HTTP control plane
//!
//! Routes:
//! - `GET|POST|DELETE /api/v1/kv/{path}`: single-key operations, listings,
//!   and the full-tree view
//! - `POST /api/v1/query`: batched multi-query
//! - `GET /api/v1/cluster/nodes`: peer set (or the single-node dev view)
//! - `POST /api/v1/cluster/update`: inbound replication
//! - `ANY /api/v1/plugin/{name}/...`: plugin passthrough
//! - `POST /api/v1/login`: stub
//! - `GET /api/v1/perf/metrics`: Prometheus exposition
//!
//! Errors are returned as `{"message": "<text>"}` JSON bodies.

pub mod kv;
pub mod plugin;
pub mod query;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

use crate::cluster::{Cluster, Message};
use crate::common::{Config, Mode, METRICS};
use crate::store::Store;
use plugin::PluginHost;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub cluster: Arc<Cluster>,
    pub plugins: Arc<dyn PluginHost>,
    pub config: Arc<Config>,
}

/// Build the router with all public endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/kv/", any(kv::handle_root))
        .route("/api/v1/kv/*path", any(kv::handle))
        .route("/api/v1/query", post(query::handle))
        .route("/api/v1/login", post(login))
        .route("/api/v1/cluster/nodes", get(cluster_nodes))
        .route("/api/v1/cluster/update", post(cluster_update))
        .route("/api/v1/plugin/*rest", any(plugin::handle))
        .route("/api/v1/perf/metrics", get(metrics))
        .with_state(state)
}

/// `{"message": ...}` body with the given status.
pub(crate) fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (status, Json(json!({ "message": text.into() }))).into_response()
}

async fn login() -> Response {
    message(StatusCode::OK, "ok")
}

async fn cluster_nodes(State(state): State<AppState>) -> Response {
    if state.config.mode == Mode::Dev {
        let body = json!({
            "mode": "dev",
            "nodes": [{ "address": state.cluster.advertise_addr(), "public_key": "" }],
        });
        return (StatusCode::OK, Json(body)).into_response();
    }
    let mut nodes = state.cluster.peers().to_vec();
    nodes.push(state.cluster.advertise_addr().to_string());
    let body = json!({ "mode": "cluster", "nodes": nodes });
    (StatusCode::OK, Json(body)).into_response()
}

async fn cluster_update(
    State(state): State<AppState>,
    Json(inbound): Json<Message>,
) -> Response {
    match state.cluster.ingest(inbound) {
        Ok(()) => message(StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "rejected inbound update");
            message(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

async fn metrics() -> Response {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        METRICS.to_prometheus(),
    )
        .into_response()
}
