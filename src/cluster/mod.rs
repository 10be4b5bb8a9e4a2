//! Cluster transport
//!
//! Local mutations are serialised as [`UpdateRecord`]s, wrapped in a wire
//! [`Message`] of kind `update`, and fanned out to every peer over HTTP.
//! Inbound messages of the same kind land on the bounded `updates` channel,
//! which the apply loop (see [`apply`]) drains into the store with emission
//! suppressed, so a received update can never echo back out.
//!
//! The store hands updates to a bounded outbox instead of the transport
//! itself; a slow peer therefore never back-pressures a request handler.
//! When the outbox is full the update is dropped and counted.

pub mod apply;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::common::{base64_bytes, ClusterConfig, Error, Result, METRICS};
use crate::store::{Emitter, UpdateRecord};

/// Wire message kind carrying a serialized update record
pub const KIND_UPDATE: &str = "update";

/// A message on the cluster wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub epoch: u64,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub origin: String,
    #[serde(default, with = "base64_bytes")]
    pub data: Vec<u8>,
    pub data_type: String,
}

/// Handle on the cluster: peer set, inbound queue, and message framing.
pub struct Cluster {
    node_id: String,
    advertise_addr: String,
    peers: Vec<String>,
    updates_tx: mpsc::Sender<Message>,
    epoch: AtomicU64,
}

impl Cluster {
    /// Build the cluster handle and its two channels: the outbox the store
    /// emits into, and the inbound update queue the apply loop drains.
    #[allow(clippy::type_complexity)]
    pub fn new(
        config: &ClusterConfig,
        node_id: &str,
        buffer_size: usize,
    ) -> (
        Arc<Self>,
        OutboxEmitter,
        mpsc::Receiver<UpdateRecord>,
        mpsc::Receiver<Message>,
    ) {
        let (outbox_tx, outbox_rx) = mpsc::channel(buffer_size);
        let (updates_tx, updates_rx) = mpsc::channel(buffer_size);
        let cluster = Arc::new(Self {
            node_id: node_id.to_string(),
            advertise_addr: config.advertise_addr.clone(),
            peers: config.peers.clone(),
            updates_tx,
            epoch: AtomicU64::new(0),
        });
        (cluster, OutboxEmitter { tx: outbox_tx }, outbox_rx, updates_rx)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn advertise_addr(&self) -> &str {
        &self.advertise_addr
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Frame an update record as a wire message.
    pub fn frame(&self, update: &UpdateRecord) -> Result<Message> {
        Ok(Message {
            epoch: self.epoch.fetch_add(1, Ordering::Relaxed),
            id: uuid::Uuid::new_v4().to_string(),
            kind: KIND_UPDATE.to_string(),
            origin: self.node_id.clone(),
            data: serde_json::to_vec(update)?,
            data_type: "UpdateRecord".to_string(),
        })
    }

    /// Accept an inbound wire message. The node's own emissions and unknown
    /// kinds are ignored; a full queue drops the message and counts it.
    pub fn ingest(&self, message: Message) -> Result<()> {
        if message.origin == self.node_id {
            return Ok(());
        }
        if message.kind != KIND_UPDATE {
            tracing::debug!(kind = %message.kind, "ignoring message of unknown kind");
            return Ok(());
        }
        match self.updates_tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                METRICS.updates_dropped.inc();
                Err(Error::Replication("update queue is full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::Replication("update queue is closed".into()))
            }
        }
    }
}

/// The store's side of the replication seam: emitting is a non-blocking
/// hand-off to the outbox.
pub struct OutboxEmitter {
    tx: mpsc::Sender<UpdateRecord>,
}

impl Emitter for OutboxEmitter {
    fn emit(&self, update: UpdateRecord) -> Result<()> {
        self.tx.try_send(update).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::Replication("outbox is full".into()),
            mpsc::error::TrySendError::Closed(_) => Error::Replication("outbox is closed".into()),
        })
    }
}

/// Drain the outbox, framing each update and POSTing it to every peer.
/// Delivery is best-effort; failures are logged per peer.
pub async fn run_sender(
    cluster: Arc<Cluster>,
    mut outbox: mpsc::Receiver<UpdateRecord>,
    mut terminate: watch::Receiver<bool>,
) {
    let client = reqwest::Client::new();
    loop {
        tokio::select! {
            changed = terminate.changed() => {
                if changed.is_err() || *terminate.borrow() {
                    tracing::debug!("cluster sender stopping");
                    return;
                }
            }
            update = outbox.recv() => {
                let Some(update) = update else { return };
                let message = match cluster.frame(&update) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to frame update");
                        continue;
                    }
                };
                for peer in cluster.peers() {
                    let url = format!("{}/api/v1/cluster/update", peer.trim_end_matches('/'));
                    if let Err(e) = client.post(&url).json(&message).send().await {
                        tracing::warn!(peer = %peer, error = %e, "failed to deliver update");
                    }
                }
            }
        }
    }
}
