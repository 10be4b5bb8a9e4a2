//! The multi-query dispatcher
//!
//! A batch of heterogeneous operations executes concurrently, one task per
//! entry; an unknown verb never spawns a task. Results are gathered with a
//! counted join and aggregated under a fresh id. Response order is not
//! guaranteed to match the request.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;

use super::{message, AppState};
use crate::store::{Store, ROOT_KV};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryObject {
    #[serde(default)]
    pub verb: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub secret: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MultiQuery {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub query: Vec<QueryObject>,
    #[serde(default)]
    pub query_errors: bool,
}

pub async fn handle(State(state): State<AppState>, body: Bytes) -> Response {
    let request: MultiQuery = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return message(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let mut results: Vec<QueryObject> = Vec::with_capacity(request.query.len());
    let mut tasks: JoinSet<QueryObject> = JoinSet::new();
    for mut entry in request.query {
        let store = state.store.clone();
        match entry.verb.to_uppercase().as_str() {
            "GET" => {
                tasks.spawn(async move { do_get(store, entry) });
            }
            "PUT" | "POST" => {
                tasks.spawn(async move { do_put(store, entry) });
            }
            "DELETE" => {
                tasks.spawn(async move { do_delete(store, entry) });
            }
            _ => {
                entry.error = format!("Verb {} is not a valid operation", entry.verb);
                results.push(entry);
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(entry) => results.push(entry),
            Err(e) => tracing::error!(error = %e, "query task failed"),
        }
    }

    let query_errors = results.iter().any(|entry| !entry.error.is_empty());
    let response = MultiQuery {
        id: uuid::Uuid::new_v4().to_string(),
        query: results,
        query_errors,
    };
    let status = if query_errors {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    (status, Json(response)).into_response()
}

fn do_get(store: Arc<Store>, mut entry: QueryObject) -> QueryObject {
    match store.get(&entry.key, ROOT_KV) {
        Err(e) => entry.error = e.to_string(),
        Ok(bytes) if bytes.is_empty() => {
            entry.error = format!("Key {} does not exist", entry.key);
        }
        Ok(bytes) => {
            let plain = if entry.secret {
                store.reveal(&bytes)
            } else {
                bytes
            };
            entry.value = String::from_utf8_lossy(&plain).into_owned();
        }
    }
    entry
}

fn do_put(store: Arc<Store>, mut entry: QueryObject) -> QueryObject {
    if let Err(e) = store.put(&entry.key, entry.value.as_bytes(), ROOT_KV, entry.secret) {
        entry.error = e.to_string();
    }
    entry
}

fn do_delete(store: Arc<Store>, mut entry: QueryObject) -> QueryObject {
    if let Err(e) = store.delete_key(&entry.key, ROOT_KV, true) {
        entry.error = e.to_string();
    }
    entry
}
