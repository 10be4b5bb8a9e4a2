//! The key-value store
//!
//! Values live in nested buckets addressed by slash-delimited paths; the
//! terminal segment is the key, everything before it the bucket chain. Each
//! leaf holds an [`Envelope`] carrying the payload, a secret flag, and the
//! advisory locks claimed on the key. Every local mutation emits exactly
//! one update to the cluster; mutations applied from the cluster emit
//! nothing.

pub mod engine;
pub mod types;

use chrono::Utc;
use std::path::Path;
use std::time::Instant;

use crate::common::{Error, Result, SharedKey, METRICS};
use engine::Engine;
pub use engine::{ROOT_KV, ROOT_SYSTEM};
pub use types::{Envelope, Lock, UpdateRecord, UpdateType};

/// Narrow seam between the store and the cluster transport. The store only
/// ever hands updates forward; it never sees the transport itself.
pub trait Emitter: Send + Sync {
    fn emit(&self, update: UpdateRecord) -> Result<()>;
}

/// Split a path into its bucket chain and terminal key. An empty terminal
/// segment references the bucket itself.
///
/// `""` → `([], "")`, `"a"` → `([], "a")`, `"a/"` → `(["a"], "")`,
/// `"a/b"` → `(["a"], "b")`, `"a/b/"` → `(["a","b"], "")`.
pub fn parse_path(path: &str) -> (Vec<String>, String) {
    match path.rfind('/') {
        None => (Vec::new(), path.to_string()),
        Some(idx) => {
            let buckets = path[..idx].split('/').map(String::from).collect();
            (buckets, path[idx + 1..].to_string())
        }
    }
}

pub struct Store {
    engine: Engine,
    shared_key: SharedKey,
    emitter: Box<dyn Emitter>,
    node_id: String,
    node_address: String,
}

impl Store {
    /// Open the store, creating the database (and parent directories) if
    /// absent.
    pub fn open(
        db_path: &Path,
        shared_key: SharedKey,
        emitter: Box<dyn Emitter>,
        node_id: &str,
        node_address: &str,
    ) -> Result<Self> {
        let probe_start = Instant::now();
        let engine = Engine::open(db_path)?;
        let store = Self {
            engine,
            shared_key,
            emitter,
            node_id: node_id.to_string(),
            node_address: node_address.to_string(),
        };
        store.record_probe("startup", probe_start);
        Ok(store)
    }

    /// Flush and release the database.
    pub fn close(&self) -> Result<()> {
        self.engine.flush()
    }

    /// Wrap `value` in an envelope and persist it. `plaintext` records
    /// whether the payload failed to parse as JSON; when `secret` is set the
    /// payload is sealed under the shared key first.
    pub fn put(&self, path: &str, value: &[u8], root: &str, secret: bool) -> Result<()> {
        let plaintext = serde_json::from_slice::<serde::de::IgnoredAny>(value).is_err();
        let data = if secret {
            self.shared_key.encrypt(value)?
        } else {
            value.to_vec()
        };
        let envelope = Envelope {
            last_updated: Utc::now(),
            secret,
            data,
            locks: Vec::new(),
            plaintext,
        };
        self.put_object(path, envelope, root, secret, true)
    }

    /// Persist an envelope at `path`. When `emit` is set a `put:key` update
    /// is published after the write.
    pub fn put_object(
        &self,
        path: &str,
        value: Envelope,
        root: &str,
        _secret: bool,
        emit: bool,
    ) -> Result<()> {
        let start = Instant::now();
        self.persist(path, &value, root)?;
        self.record_probe(UpdateType::PutKey.as_str(), start);
        if emit {
            self.emit(UpdateType::PutKey, path, value);
        }
        Ok(())
    }

    fn persist(&self, path: &str, value: &Envelope, root: &str) -> Result<()> {
        let (buckets, key) = parse_path(path);
        if key.is_empty() {
            return Err(Error::BadRequest(format!(
                "Path {} does not name a key",
                path
            )));
        }
        let bytes = serde_json::to_vec(value)?;
        self.engine.update(root, |tx| {
            tx.ensure_chain(&buckets)?;
            tx.put_leaf(&buckets, &key, &bytes)
        })
    }

    /// Fetch the stored payload at `path`.
    pub fn get(&self, path: &str, root: &str) -> Result<Vec<u8>> {
        Ok(self.get_object(path, root)?.data)
    }

    /// Fetch the envelope at `path`. A missing bucket chain and an absent
    /// leaf surface as distinct errors.
    pub fn get_object(&self, path: &str, root: &str) -> Result<Envelope> {
        let start = Instant::now();
        let (buckets, key) = parse_path(path);
        let bytes = self.engine.view(root, |tx| tx.get_leaf(&buckets, &key))?;
        self.record_probe("get:key", start);
        match bytes {
            None => Err(Error::KeyNotFound(path.to_string())),
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        }
    }

    /// List the entries of the bucket named by `path`. Child buckets are
    /// suffixed with `/`.
    pub fn get_keys(&self, path: &str, root: &str) -> Result<Vec<String>> {
        let start = Instant::now();
        let (mut buckets, key) = parse_path(path);
        if !key.is_empty() {
            buckets.push(key);
        }
        let children = self.engine.view(root, |tx| tx.children(&buckets))?;
        self.record_probe("get:keys", start);
        Ok(children
            .into_iter()
            .map(|(name, is_bucket)| if is_bucket { name + "/" } else { name })
            .collect())
    }

    /// Materialise the whole tree under the root bucket `root`: buckets
    /// become nested objects, leaves the stored envelope JSON.
    pub fn get_tree(&self, root: &str) -> Result<serde_json::Value> {
        let start = Instant::now();
        let tree = self.engine.view(root, |tx| tx.subtree(&[]))?;
        self.record_probe("get:tree", start);
        Ok(tree)
    }

    /// Remove the leaf at `path`. Removing an absent leaf succeeds.
    pub fn delete_key(&self, path: &str, root: &str, emit: bool) -> Result<()> {
        let start = Instant::now();
        let (buckets, key) = parse_path(path);
        self.engine
            .update(root, |tx| tx.delete_leaf(&buckets, &key))?;
        self.record_probe(UpdateType::DeleteKey.as_str(), start);
        if emit {
            self.emit(UpdateType::DeleteKey, path, Envelope::default());
        }
        Ok(())
    }

    /// Remove the bucket referenced by the terminal segment of `path`,
    /// cascading over everything beneath it.
    pub fn delete_bucket(&self, path: &str, root: &str, emit: bool) -> Result<()> {
        let start = Instant::now();
        let (mut buckets, key) = parse_path(path);
        let target = if key.is_empty() {
            match buckets.pop() {
                Some(target) if !target.is_empty() => target,
                _ => {
                    return Err(Error::BadRequest(format!(
                        "Path {} does not name a bucket",
                        path
                    )))
                }
            }
        } else {
            key
        };
        self.engine
            .update(root, |tx| tx.delete_bucket(&buckets, &target))?;
        self.record_probe(UpdateType::DeleteBucket.as_str(), start);
        if emit {
            self.emit(UpdateType::DeleteBucket, path, Envelope::default());
        }
        Ok(())
    }

    /// Claim an advisory lock on `path`. The lock is appended to the
    /// envelope's lock list and replicated as `lock:create`.
    pub fn lock(&self, path: &str, root: &str, emit: bool) -> Result<Lock> {
        let start = Instant::now();
        let lock = Lock::claim(path, root, &self.node_id, &self.node_address);
        let mut envelope = self.get_object(path, root)?;
        envelope.locks.push(lock.clone());
        self.persist(path, &envelope, root)?;
        self.record_probe(UpdateType::LockCreate.as_str(), start);
        if emit {
            self.emit(UpdateType::LockCreate, path, envelope);
        }
        Ok(lock)
    }

    /// Release a previously claimed lock. The remaining locks keep their
    /// order; an unknown lock id is a typed error.
    pub fn unlock(&self, lock: &Lock, emit: bool) -> Result<()> {
        let start = Instant::now();
        let mut envelope = self.get_object(&lock.key, &lock.prefix)?;
        let idx = envelope
            .locks
            .iter()
            .position(|held| held.lock_id == lock.lock_id)
            .ok_or_else(|| Error::LockNotFound(lock.lock_id.clone()))?;
        envelope.locks.remove(idx);
        self.persist(&lock.key, &envelope, &lock.prefix)?;
        self.record_probe(UpdateType::LockDelete.as_str(), start);
        if emit {
            let value = Envelope {
                data: serde_json::to_vec(lock)?,
                ..Envelope::default()
            };
            self.emit(UpdateType::LockDelete, &lock.key, value);
        }
        Ok(())
    }

    /// Release the lock a peer published. Replicated claims are assigned
    /// fresh ids on each node, so a release can arrive carrying an id this
    /// node never generated; lock lists replicate in claim order, so the
    /// fallback releases the oldest held lock.
    pub(crate) fn unlock_replicated(&self, lock: &Lock) -> Result<()> {
        match self.unlock(lock, false) {
            Err(Error::LockNotFound(_)) => {
                let envelope = self.get_object(&lock.key, &lock.prefix)?;
                let held = envelope
                    .locks
                    .first()
                    .cloned()
                    .ok_or_else(|| Error::LockNotFound(lock.lock_id.clone()))?;
                self.unlock(&held, false)
            }
            result => result,
        }
    }

    /// Decrypt a secret payload, falling back to the raw bytes when the
    /// payload is not sealed under the current key.
    pub fn reveal(&self, data: &[u8]) -> Vec<u8> {
        match self.shared_key.decrypt(data) {
            Ok(plaintext) => plaintext,
            Err(_) => data.to_vec(),
        }
    }

    fn emit(&self, update_type: UpdateType, key: &str, value: Envelope) {
        let record = UpdateRecord {
            update_type,
            key: key.to_string(),
            value,
        };
        match self.emitter.emit(record) {
            Ok(()) => METRICS.updates_emitted.inc(),
            Err(e) => {
                METRICS.updates_dropped.inc();
                tracing::error!(update_type = %update_type, key, error = %e, "failed to emit update");
            }
        }
    }

    fn record_probe(&self, transaction: &str, start: Instant) {
        METRICS
            .transaction_time_ms
            .set(transaction, start.elapsed().as_millis() as u64);
        if let Ok(size) = self.engine.size_on_disk() {
            METRICS.db_size_bytes.set(size);
        }
    }
}
