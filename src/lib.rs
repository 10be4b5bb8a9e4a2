//! # warren
//!
//! A replicated, path-addressed key-value store with:
//! - Nested buckets addressed by slash-delimited paths
//! - Per-key advisory locks carried inside the stored envelope
//! - Optional AES-256-GCM encryption of individual values
//! - Best-effort replication of mutations across a peer set
//! - An HTTP control plane with single and batched operations
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  put/get/delete  ┌───────────┐   emit    ┌───────────┐
//! │  HTTP API  │ ───────────────▶ │   Store   │ ────────▶ │  cluster  │
//! │  (axum)    │                  │  (sled)   │           │  fan-out  │
//! └────────────┘                  └───────────┘           └───────────┘
//!       │                              ▲                        │
//!       │ POST /api/v1/cluster/update  │ apply (no re-emit)     ▼
//!       └──────────────┐         ┌─────┴───────┐           peer nodes
//!                      └───────▶ │ update loop │
//!                                └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! warrend serve --port 8080 --db ./warren-data/kv
//! ```

pub mod api;
pub mod cluster;
pub mod common;
pub mod node;
pub mod store;

pub use common::{Config, Error, Result};
pub use node::Node;
pub use store::Store;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
