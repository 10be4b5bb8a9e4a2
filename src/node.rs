//! Node lifecycle
//!
//! Startup order: open the store, load the shared key, register the store
//! under the `kv` RPC name, spawn the update loop and the cluster sender,
//! then bind the HTTP listener. Shutdown flips the terminate signal, drains
//! HTTP with a 10 second grace period, and closes the store last.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::api::plugin::{NoPlugins, PluginHost};
use crate::api::{create_router, AppState};
use crate::cluster::{apply::run_update_loop, run_sender, Cluster};
use crate::common::{Config, Result, SharedKey};
use crate::store::Store;

/// Grace period for in-flight requests on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct Node {
    config: Config,
    plugins: Arc<dyn PluginHost>,
}

impl Node {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            plugins: Arc::new(NoPlugins),
        }
    }

    /// Attach a plugin host. Without one, plugin routes answer 404.
    pub fn with_plugin_host(mut self, plugins: Arc<dyn PluginHost>) -> Self {
        self.plugins = plugins;
        self
    }

    pub async fn serve(self) -> Result<()> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let node_id = if config.node_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            config.node_id.clone()
        };

        tracing::info!("Starting warren node: {}", node_id);
        tracing::info!("  Mode: {:?}", config.mode);
        tracing::info!("  DB path: {}", config.kv.db_path.display());
        tracing::info!("  Peers: {}", config.cluster.peers.len());

        let shared_key = SharedKey::load_or_generate(&config.kv.key_path)?;

        let (cluster, emitter, outbox_rx, updates_rx) =
            Cluster::new(&config.cluster, &node_id, config.perf.buffer_size);

        let store = Arc::new(Store::open(
            &config.kv.db_path,
            shared_key,
            Box::new(emitter),
            &node_id,
            cluster.advertise_addr(),
        )?);

        self.plugins.register_name("kv")?;

        let (terminate_tx, terminate_rx) = watch::channel(false);
        let update_loop = tokio::spawn(run_update_loop(
            store.clone(),
            updates_rx,
            terminate_rx.clone(),
        ));
        let sender = tokio::spawn(run_sender(
            cluster.clone(),
            outbox_rx,
            terminate_rx.clone(),
        ));

        let state = AppState {
            store: store.clone(),
            cluster,
            plugins: self.plugins.clone(),
            config: config.clone(),
        };
        let router = create_router(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("API listening on {}0.0.0.0:{}", config.scheme(), config.api.port);

        let shutdown_tx = terminate_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
        });

        let graceful = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(wait_for_terminate(terminate_rx.clone()));
        let server = async move { graceful.await };

        tokio::select! {
            result = server => result?,
            _ = expired_grace(terminate_rx.clone()) => {
                tracing::warn!("grace period expired, aborting open connections");
            }
        }

        update_loop.abort();
        sender.abort();
        store.close()?;
        tracing::info!("store closed");
        Ok(())
    }
}

async fn wait_for_terminate(mut terminate: watch::Receiver<bool>) {
    while !*terminate.borrow() {
        if terminate.changed().await.is_err() {
            return;
        }
    }
}

async fn expired_grace(terminate: watch::Receiver<bool>) {
    wait_for_terminate(terminate).await;
    tokio::time::sleep(SHUTDOWN_GRACE).await;
}
