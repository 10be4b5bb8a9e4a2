//! The update loop
//!
//! A single consumer drains the inbound update queue into the store. Every
//! store call on this path suppresses emission, which is the sole guard
//! against echo loops. A failed message is logged and the loop moves on.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::cluster::Message;
use crate::common::{Result, METRICS};
use crate::store::{Lock, Store, UpdateRecord, UpdateType, ROOT_KV};

/// Run until the terminate signal flips. Each iteration publishes the queue
/// depth, then drains one message or idles for 10 ms.
pub async fn run_update_loop(
    store: Arc<Store>,
    mut updates: mpsc::Receiver<Message>,
    terminate: watch::Receiver<bool>,
) {
    loop {
        METRICS.update_queue_size.set(updates.len() as u64);
        if *terminate.borrow() {
            tracing::debug!("update loop stopping");
            return;
        }
        match updates.try_recv() {
            Ok(message) => {
                if let Err(e) = apply(&store, &message) {
                    tracing::error!(origin = %message.origin, error = %e, "failed to apply update");
                }
            }
            Err(mpsc::error::TryRecvError::Empty) => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(mpsc::error::TryRecvError::Disconnected) => return,
        }
    }
}

/// Apply one inbound message to the store, with emission suppressed.
pub fn apply(store: &Store, message: &Message) -> Result<()> {
    let update: UpdateRecord = serde_json::from_slice(&message.data)?;
    match update.update_type {
        UpdateType::PutKey => {
            let secret = update.value.secret;
            store.put_object(&update.key, update.value, ROOT_KV, secret, false)?;
        }
        UpdateType::DeleteKey => store.delete_key(&update.key, ROOT_KV, false)?,
        UpdateType::DeleteBucket => store.delete_bucket(&update.key, ROOT_KV, false)?,
        UpdateType::LockCreate => {
            store.lock(&update.key, ROOT_KV, false)?;
        }
        UpdateType::LockDelete => {
            let lock: Lock = serde_json::from_slice(&update.value.data)?;
            store.unlock_replicated(&lock)?;
        }
        UpdateType::Unknown => {
            tracing::error!(key = %update.key, "update type is not a valid type");
            return Ok(());
        }
    }
    METRICS.updates_applied.inc();
    Ok(())
}
