//! Single-key REST handlers
//!
//! `GET` resolves to a value fetch, a bucket listing (trailing `/` or empty
//! path), or the full tree (`?tree=1`). `POST` stores the body, sealing it
//! first when `?secret=1`. `DELETE` removes a bucket when the path ends in
//! `/` and a key otherwise.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::{message, AppState};
use crate::common::Error;
use crate::store::ROOT_KV;

#[derive(Debug, Deserialize, Default)]
pub struct KvParams {
    #[serde(default)]
    tree: Option<String>,
    #[serde(default)]
    secret: Option<String>,
}

fn is_set(param: &Option<String>) -> bool {
    matches!(param, Some(v) if !v.is_empty())
}

/// `/api/v1/kv/`, the root listing.
pub async fn handle_root(
    state: State<AppState>,
    method: Method,
    params: Query<KvParams>,
    body: Bytes,
) -> Response {
    dispatch(state, method, String::new(), params, body)
}

/// `/api/v1/kv/{path}`
pub async fn handle(
    state: State<AppState>,
    method: Method,
    Path(path): Path<String>,
    params: Query<KvParams>,
    body: Bytes,
) -> Response {
    dispatch(state, method, path, params, body)
}

fn dispatch(
    State(state): State<AppState>,
    method: Method,
    path: String,
    Query(params): Query<KvParams>,
    body: Bytes,
) -> Response {
    if path.starts_with('/') {
        return message(
            StatusCode::BAD_REQUEST,
            format!("Path /{} is not valid", path.trim_start_matches('/')),
        );
    }
    if method == Method::GET {
        get_handler(&state, &path, &params)
    } else if method == Method::POST {
        put_handler(&state, &path, &params, &body)
    } else if method == Method::DELETE {
        delete_handler(&state, &path)
    } else {
        message(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("Method {} is not allowed", method),
        )
    }
}

fn get_handler(state: &AppState, path: &str, params: &KvParams) -> Response {
    if is_set(&params.tree) {
        return match state.store.get_tree(ROOT_KV) {
            Ok(tree) => (StatusCode::OK, Json(tree)).into_response(),
            Err(e) => {
                tracing::error!(error = %e, "tree listing failed");
                message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
    }

    if path.ends_with('/') || path.is_empty() {
        return match state.store.get_keys(path, ROOT_KV) {
            Ok(keys) if keys.is_empty() => message(
                StatusCode::NOT_FOUND,
                format!("Key {} does not exist", path),
            ),
            Ok(keys) => (StatusCode::OK, Json(keys)).into_response(),
            Err(e @ Error::BucketNotFound(_)) => message(StatusCode::NOT_FOUND, e.to_string()),
            Err(e) => {
                tracing::error!(error = %e, path, "listing failed");
                message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
    }

    match state.store.get(path, ROOT_KV) {
        Ok(bytes) if bytes.is_empty() => message(
            StatusCode::NOT_FOUND,
            format!("Key {} does not exist", path),
        ),
        Ok(bytes) => {
            let body = if is_set(&params.secret) {
                state.store.reveal(&bytes)
            } else {
                bytes
            };
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response()
        }
        Err(Error::KeyNotFound(_)) => message(
            StatusCode::NOT_FOUND,
            format!("Key {} does not exist", path),
        ),
        // a missing bucket chain on the single-key read path is a server
        // error; the chain should have been created by the write that the
        // caller is reading back
        Err(e) => {
            tracing::error!(error = %e, path, "get failed");
            message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn put_handler(state: &AppState, path: &str, params: &KvParams, body: &Bytes) -> Response {
    if path.is_empty() || path.ends_with('/') {
        return message(
            StatusCode::BAD_REQUEST,
            format!("Path {} does not name a key", path),
        );
    }
    match state
        .store
        .put(path, body, ROOT_KV, is_set(&params.secret))
    {
        Ok(()) => message(StatusCode::OK, "ok"),
        Err(e @ (Error::Crypto(_) | Error::BadRequest(_))) => {
            message(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, path, "put failed");
            message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn delete_handler(state: &AppState, path: &str) -> Response {
    if path.ends_with('/') {
        return match state.store.delete_bucket(path, ROOT_KV, true) {
            Ok(()) => message(StatusCode::OK, "ok"),
            Err(e @ Error::BucketNotFound(_)) => message(StatusCode::NOT_FOUND, e.to_string()),
            Err(e @ Error::BadRequest(_)) => message(StatusCode::BAD_REQUEST, e.to_string()),
            Err(e) => {
                tracing::error!(error = %e, path, "bucket delete failed");
                message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
    }
    match state.store.delete_key(path, ROOT_KV, true) {
        Ok(()) => message(StatusCode::OK, "ok"),
        Err(e @ Error::BucketNotFound(_)) => message(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => {
            tracing::error!(error = %e, path, "key delete failed");
            message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
