//! Plugin passthrough
//!
//! Requests under `/api/v1/plugin/{name}/...` are forwarded to the plugin
//! host as an invocation of `api:<name>:http_<verb>` carrying the full
//! request context. The host itself is an external collaborator; warren
//! only defines the call contract and the RPC name table the store
//! registers itself in.

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;

use super::AppState;
use crate::common::{Error, Result};

/// Request context handed to a plugin invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub url: String,
    #[serde(with = "crate::common::base64_bytes")]
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub host: String,
    pub user_agent: String,
    pub cookies: Vec<String>,
}

/// Call contract the HTTP surface uses to reach the plugin host.
pub trait PluginHost: Send + Sync {
    /// Whether an API plugin with this name is registered.
    fn has_api_plugin(&self, name: &str) -> bool;

    /// Invoke `urn` (`api:<name>:http_<verb>`) with the request context;
    /// the returned value is echoed as the HTTP response.
    fn call(&self, urn: &str, request: &ApiRequest) -> Result<serde_json::Value>;

    /// Register a service in the host's RPC name table.
    fn register_name(&self, name: &str) -> Result<()>;
}

/// Host with no plugins loaded. Registration is recorded in the log only.
pub struct NoPlugins;

impl PluginHost for NoPlugins {
    fn has_api_plugin(&self, _name: &str) -> bool {
        false
    }

    fn call(&self, urn: &str, _request: &ApiRequest) -> Result<serde_json::Value> {
        Err(Error::Internal(format!("no handler for {}", urn)))
    }

    fn register_name(&self, name: &str) -> Result<()> {
        tracing::debug!(name, "registered RPC name with no plugin host attached");
        Ok(())
    }
}

pub async fn handle(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    Path(rest): Path<String>,
    body: Bytes,
) -> Response {
    let name = rest.split('/').next().unwrap_or_default();
    if !state.plugins.has_api_plugin(name) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "the given path does not exist" })),
        )
            .into_response();
    }

    let header_value = |key: &str| {
        headers
            .get(key)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let request = ApiRequest {
        url: uri.to_string(),
        body: body.to_vec(),
        headers: headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect(),
        host: connect
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_else(|| header_value("host")),
        user_agent: header_value("user-agent"),
        cookies: headers
            .get_all("cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect(),
    };

    let urn = format!("api:{}:http_{}", name, method.as_str().to_lowercase());
    match state.plugins.call(&urn, &request) {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
