//! Two-node convergence tests
//!
//! Node A's emitter is bridged straight into node B's inbound queue, and
//! B runs a real update loop, so these tests exercise the full emit → wire
//! → apply path without a network.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

use warren::cluster::apply::run_update_loop;
use warren::cluster::{Cluster, Message, KIND_UPDATE};
use warren::common::{ClusterConfig, Result, SharedKey};
use warren::store::{Emitter, Envelope, Store, UpdateRecord, UpdateType, ROOT_KV};

/// Frames every emitted update as a wire message and feeds it to the
/// receiving node's cluster handle.
struct Bridge {
    origin: String,
    to: Arc<Cluster>,
}

impl Emitter for Bridge {
    fn emit(&self, update: UpdateRecord) -> Result<()> {
        let message = Message {
            epoch: 0,
            id: uuid::Uuid::new_v4().to_string(),
            kind: KIND_UPDATE.to_string(),
            origin: self.origin.clone(),
            data: serde_json::to_vec(&update)?,
            data_type: "UpdateRecord".to_string(),
        };
        self.to.ingest(message)
    }
}

/// Captures outbound updates so the apply path can be shown silent.
#[derive(Clone)]
struct Capture(Arc<Mutex<Vec<UpdateRecord>>>);

impl Emitter for Capture {
    fn emit(&self, update: UpdateRecord) -> Result<()> {
        self.0.lock().unwrap().push(update);
        Ok(())
    }
}

struct Pair {
    _dirs: (TempDir, TempDir),
    a: Arc<Store>,
    b: Arc<Store>,
    b_cluster: Arc<Cluster>,
    b_outbound: Capture,
    _terminate: watch::Sender<bool>,
}

fn shared_key() -> SharedKey {
    SharedKey::from_master(&SharedKey::generate_master()).unwrap()
}

/// Wire A → B and start B's update loop.
fn pair() -> Pair {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    let (b_cluster, _b_emitter, _b_outbox, b_updates) =
        Cluster::new(&ClusterConfig::default(), "node-b", 64);

    let key = shared_key();
    let a = Arc::new(
        Store::open(
            &dir_a.path().join("db"),
            key.clone(),
            Box::new(Bridge {
                origin: "node-a".to_string(),
                to: b_cluster.clone(),
            }),
            "node-a",
            "http://a:8080",
        )
        .unwrap(),
    );

    let b_outbound = Capture(Arc::new(Mutex::new(Vec::new())));
    let b = Arc::new(
        Store::open(
            &dir_b.path().join("db"),
            key,
            Box::new(b_outbound.clone()),
            "node-b",
            "http://b:8080",
        )
        .unwrap(),
    );

    let (terminate_tx, terminate_rx) = watch::channel(false);
    tokio::spawn(run_update_loop(b.clone(), b_updates, terminate_rx));

    Pair {
        _dirs: (dir_a, dir_b),
        a,
        b,
        b_cluster,
        b_outbound,
        _terminate: terminate_tx,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("nodes did not converge within timeout");
}

#[tokio::test]
async fn test_put_converges() {
    let nodes = pair();
    nodes.a.put("a/b", br#"{"x":1}"#, ROOT_KV, false).unwrap();

    let b = nodes.b.clone();
    wait_until(move || b.get("a/b", ROOT_KV).is_ok()).await;
    assert_eq!(nodes.b.get("a/b", ROOT_KV).unwrap(), br#"{"x":1}"#);

    let applied = nodes.b.get_object("a/b", ROOT_KV).unwrap();
    let original = nodes.a.get_object("a/b", ROOT_KV).unwrap();
    assert_eq!(applied, original);
}

#[tokio::test]
async fn test_delete_key_converges() {
    let nodes = pair();
    nodes.a.put("k", b"{}", ROOT_KV, false).unwrap();
    let b = nodes.b.clone();
    wait_until(move || b.get("k", ROOT_KV).is_ok()).await;

    nodes.a.delete_key("k", ROOT_KV, true).unwrap();
    let b = nodes.b.clone();
    wait_until(move || b.get("k", ROOT_KV).is_err()).await;
}

#[tokio::test]
async fn test_delete_bucket_converges() {
    let nodes = pair();
    nodes.a.put("dir/k", b"{}", ROOT_KV, false).unwrap();
    let b = nodes.b.clone();
    wait_until(move || b.get("dir/k", ROOT_KV).is_ok()).await;

    nodes.a.delete_bucket("dir/", ROOT_KV, true).unwrap();
    let b = nodes.b.clone();
    wait_until(move || b.get_keys("", ROOT_KV).map(|k| k.is_empty()).unwrap_or(false)).await;
}

#[tokio::test]
async fn test_lock_and_unlock_converge() {
    let nodes = pair();
    nodes.a.put("p", b"{}", ROOT_KV, false).unwrap();
    let b = nodes.b.clone();
    wait_until(move || b.get("p", ROOT_KV).is_ok()).await;

    let lock = nodes.a.lock("p", ROOT_KV, true).unwrap();
    let b = nodes.b.clone();
    wait_until(move || {
        b.get_object("p", ROOT_KV)
            .map(|env| env.locks.len() == 1)
            .unwrap_or(false)
    })
    .await;
    // the applying node assigns its own lock id
    let replicated = &nodes.b.get_object("p", ROOT_KV).unwrap().locks[0];
    assert_eq!(replicated.key, "p");

    nodes.a.unlock(&lock, true).unwrap();
    let b = nodes.b.clone();
    wait_until(move || {
        b.get_object("p", ROOT_KV)
            .map(|env| env.locks.is_empty())
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn test_applied_updates_emit_nothing() {
    let nodes = pair();
    nodes.a.put("a/b", b"{}", ROOT_KV, false).unwrap();
    nodes.a.delete_key("a/b", ROOT_KV, true).unwrap();

    let b = nodes.b.clone();
    wait_until(move || b.get("a/b", ROOT_KV).is_err() && b.get_keys("a/", ROOT_KV).is_ok()).await;
    assert!(nodes.b_outbound.0.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_update_type_does_not_stop_the_loop() {
    let nodes = pair();

    let bogus = Message {
        epoch: 0,
        id: uuid::Uuid::new_v4().to_string(),
        kind: KIND_UPDATE.to_string(),
        origin: "node-a".to_string(),
        data: br#"{"update_type":"compact:db","key":"x","value":{}}"#.to_vec(),
        data_type: "UpdateRecord".to_string(),
    };
    nodes.b_cluster.ingest(bogus).unwrap();

    // the loop keeps applying afterwards
    nodes.a.put("after", b"{}", ROOT_KV, false).unwrap();
    let b = nodes.b.clone();
    wait_until(move || b.get("after", ROOT_KV).is_ok()).await;
}

#[tokio::test]
async fn test_own_origin_messages_are_ignored() {
    let nodes = pair();

    let echo = Message {
        epoch: 0,
        id: uuid::Uuid::new_v4().to_string(),
        kind: KIND_UPDATE.to_string(),
        origin: "node-b".to_string(),
        data: serde_json::to_vec(&UpdateRecord {
            update_type: UpdateType::PutKey,
            key: "echoed".to_string(),
            value: Envelope::default(),
        })
        .unwrap(),
        data_type: "UpdateRecord".to_string(),
    };
    nodes.b_cluster.ingest(echo).unwrap();

    nodes.a.put("marker", b"{}", ROOT_KV, false).unwrap();
    let b = nodes.b.clone();
    wait_until(move || b.get("marker", ROOT_KV).is_ok()).await;
    assert!(nodes.b.get("echoed", ROOT_KV).is_err());
}
