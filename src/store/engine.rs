//! Bucketed storage over an embedded ordered key-value engine
//!
//! Each top-level bucket (`kv`, `_system`) is a sled tree. Nested buckets
//! are encoded inside a tree as `/`-joined key prefixes with an explicit
//! marker entry whose key ends in `/`; leaf entries use the bare joined
//! path. Segment names never contain `/`, so the encoding is unambiguous,
//! and a leaf and a bucket cannot share a name at the same level.
//!
//! Reads go straight to the tree and may run concurrently. Mutations are
//! serialised by a single-writer lock and staged in a [`sled::Batch`] that
//! is applied atomically when the closure returns.

use sled::IVec;
use std::path::Path;
use std::sync::Mutex;

use crate::common::{Error, Result};

/// Root bucket holding user data
pub const ROOT_KV: &str = "kv";

/// Reserved root bucket
pub const ROOT_SYSTEM: &str = "_system";

pub struct Engine {
    db: sled::Db,
    write_lock: Mutex<()>,
}

impl Engine {
    /// Open the database at `path`, creating it and any parent directories
    /// if absent. The `kv` and `_system` root buckets are created on open.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = sled::open(path)?;
        db.open_tree(ROOT_KV)?;
        db.open_tree(ROOT_SYSTEM)?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    /// Flush dirty buffers to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn size_on_disk(&self) -> Result<u64> {
        Ok(self.db.size_on_disk()?)
    }

    fn tree(&self, root: &str) -> Result<sled::Tree> {
        Ok(self.db.open_tree(root)?)
    }

    /// Run a read-only closure against the root bucket `root`.
    pub fn view<T>(&self, root: &str, f: impl FnOnce(&ReadTxn) -> Result<T>) -> Result<T> {
        let txn = ReadTxn {
            tree: self.tree(root)?,
        };
        f(&txn)
    }

    /// Run a mutating closure against the root bucket `root`. Staged writes
    /// are applied atomically on success and discarded on error.
    pub fn update<T>(&self, root: &str, f: impl FnOnce(&mut WriteTxn) -> Result<T>) -> Result<T> {
        let tree = self.tree(root)?;
        let _guard = self.write_lock.lock().unwrap();
        let mut txn = WriteTxn {
            read: ReadTxn { tree },
            batch: sled::Batch::default(),
        };
        let out = f(&mut txn)?;
        txn.read.tree.apply_batch(txn.batch)?;
        Ok(out)
    }
}

fn leaf_key(buckets: &[String], key: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for b in buckets {
        out.extend_from_slice(b.as_bytes());
        out.push(b'/');
    }
    out.extend_from_slice(key.as_bytes());
    out
}

fn marker_key(buckets: &[String]) -> Vec<u8> {
    leaf_key(buckets, "")
}

/// Read access to one root bucket.
pub struct ReadTxn {
    tree: sled::Tree,
}

impl ReadTxn {
    /// Error unless every bucket in the chain exists.
    fn require_chain(&self, buckets: &[String]) -> Result<()> {
        for depth in 1..=buckets.len() {
            if self.tree.get(marker_key(&buckets[..depth]))?.is_none() {
                return Err(Error::BucketNotFound(buckets[depth - 1].clone()));
            }
        }
        Ok(())
    }

    /// Fetch the raw bytes at `key` inside the bucket chain, or `None` for
    /// an absent leaf. A missing chain is an error.
    pub fn get_leaf(&self, buckets: &[String], key: &str) -> Result<Option<IVec>> {
        self.require_chain(buckets)?;
        Ok(self.tree.get(leaf_key(buckets, key))?)
    }

    /// List the immediate children of a bucket: `(name, is_bucket)` pairs
    /// in the engine's byte order.
    pub fn children(&self, buckets: &[String]) -> Result<Vec<(String, bool)>> {
        self.require_chain(buckets)?;
        let prefix = marker_key(buckets);
        let mut out: Vec<(String, bool)> = Vec::new();
        for entry in self.tree.scan_prefix(&prefix) {
            let (full, _) = entry?;
            let rest = &full[prefix.len()..];
            if rest.is_empty() {
                // the bucket's own marker
                continue;
            }
            let name = match rest.iter().position(|&b| b == b'/') {
                Some(idx) => (String::from_utf8_lossy(&rest[..idx]).into_owned(), true),
                None => (String::from_utf8_lossy(rest).into_owned(), false),
            };
            if out.last() != Some(&name) {
                out.push(name);
            }
        }
        Ok(out)
    }

    /// Materialise the subtree rooted at the bucket chain: nested buckets
    /// become nested objects, leaves the raw JSON stored in them.
    pub fn subtree(&self, buckets: &[String]) -> Result<serde_json::Value> {
        let mut map = serde_json::Map::new();
        for (name, is_bucket) in self.children(buckets)? {
            if is_bucket {
                let mut chain = buckets.to_vec();
                chain.push(name.clone());
                map.insert(name, self.subtree(&chain)?);
            } else {
                let bytes = self
                    .tree
                    .get(leaf_key(buckets, &name))?
                    .unwrap_or_default();
                map.insert(name, serde_json::from_slice(&bytes)?);
            }
        }
        Ok(serde_json::Value::Object(map))
    }
}

/// Write access to one root bucket. Reads observe the committed state, not
/// the staged batch; every operation stages its full effect before commit.
pub struct WriteTxn {
    read: ReadTxn,
    batch: sled::Batch,
}

impl WriteTxn {
    /// Create every bucket in the chain that does not yet exist. Errors if a
    /// leaf already holds one of the names.
    pub fn ensure_chain(&mut self, buckets: &[String]) -> Result<()> {
        for depth in 1..=buckets.len() {
            let chain = &buckets[..depth];
            let leaf = leaf_key(&chain[..depth - 1], &chain[depth - 1]);
            if self.read.tree.get(&leaf)?.is_some() {
                return Err(Error::BadRequest(format!(
                    "{} is a key, not a bucket",
                    chain.join("/")
                )));
            }
            let marker = marker_key(chain);
            if self.read.tree.get(&marker)?.is_none() {
                self.batch.insert(marker, IVec::default());
            }
        }
        Ok(())
    }

    /// Stage a leaf write. Errors if a bucket already holds the name.
    pub fn put_leaf(&mut self, buckets: &[String], key: &str, value: &[u8]) -> Result<()> {
        let mut chain = buckets.to_vec();
        chain.push(key.to_string());
        if self.read.tree.get(marker_key(&chain))?.is_some() {
            return Err(Error::BadRequest(format!(
                "{} is a bucket, not a key",
                chain.join("/")
            )));
        }
        self.batch.insert(leaf_key(buckets, key), value);
        Ok(())
    }

    /// Stage a leaf removal. An absent leaf is not an error; a missing
    /// bucket chain is.
    pub fn delete_leaf(&mut self, buckets: &[String], key: &str) -> Result<()> {
        self.read.require_chain(buckets)?;
        self.batch.remove(leaf_key(buckets, key));
        Ok(())
    }

    /// Stage removal of the bucket `name` and everything beneath it.
    pub fn delete_bucket(&mut self, buckets: &[String], name: &str) -> Result<()> {
        self.read.require_chain(buckets)?;
        let mut chain = buckets.to_vec();
        chain.push(name.to_string());
        let prefix = marker_key(&chain);
        if self.read.tree.get(&prefix)?.is_none() {
            return Err(Error::BucketNotFound(name.to_string()));
        }
        for entry in self.read.tree.scan_prefix(&prefix) {
            let (key, _) = entry?;
            self.batch.remove(key);
        }
        Ok(())
    }
}

impl std::ops::Deref for WriteTxn {
    type Target = ReadTxn;

    fn deref(&self) -> &ReadTxn {
        &self.read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_engine() -> (TempDir, Engine) {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(&dir.path().join("db")).unwrap();
        (dir, engine)
    }

    fn chain(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deeply/nested/db");
        Engine::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_put_and_get_leaf() {
        let (_dir, engine) = open_engine();
        engine
            .update(ROOT_KV, |tx| {
                tx.ensure_chain(&chain(&["a", "b"]))?;
                tx.put_leaf(&chain(&["a", "b"]), "c", b"value")
            })
            .unwrap();
        let got = engine
            .view(ROOT_KV, |tx| tx.get_leaf(&chain(&["a", "b"]), "c"))
            .unwrap();
        assert_eq!(got.unwrap().as_ref(), b"value");
    }

    #[test]
    fn test_get_leaf_missing_chain_is_an_error() {
        let (_dir, engine) = open_engine();
        let err = engine
            .view(ROOT_KV, |tx| tx.get_leaf(&chain(&["nope"]), "c"))
            .unwrap_err();
        assert!(matches!(err, Error::BucketNotFound(b) if b == "nope"));
    }

    #[test]
    fn test_children_marks_buckets() {
        let (_dir, engine) = open_engine();
        engine
            .update(ROOT_KV, |tx| {
                tx.ensure_chain(&chain(&["a"]))?;
                tx.put_leaf(&chain(&["a"]), "leaf", b"{}")?;
                tx.ensure_chain(&chain(&["a", "sub"]))?;
                tx.put_leaf(&chain(&["a", "sub"]), "inner", b"{}")
            })
            .unwrap();
        let children = engine
            .view(ROOT_KV, |tx| tx.children(&chain(&["a"])))
            .unwrap();
        assert_eq!(
            children,
            vec![("leaf".to_string(), false), ("sub".to_string(), true)]
        );
    }

    #[test]
    fn test_name_collision_rejected_both_ways() {
        let (_dir, engine) = open_engine();
        engine
            .update(ROOT_KV, |tx| tx.put_leaf(&[], "name", b"{}"))
            .unwrap();
        // bucket over existing leaf
        let err = engine
            .update(ROOT_KV, |tx| tx.ensure_chain(&chain(&["name"])))
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
        // leaf over existing bucket
        engine
            .update(ROOT_KV, |tx| tx.ensure_chain(&chain(&["dir"])))
            .unwrap();
        let err = engine
            .update(ROOT_KV, |tx| tx.put_leaf(&[], "dir", b"{}"))
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn test_delete_bucket_cascades() {
        let (_dir, engine) = open_engine();
        engine
            .update(ROOT_KV, |tx| {
                tx.ensure_chain(&chain(&["a", "b"]))?;
                tx.put_leaf(&chain(&["a", "b"]), "x", b"{}")?;
                tx.put_leaf(&chain(&["a"]), "y", b"{}")
            })
            .unwrap();
        engine
            .update(ROOT_KV, |tx| tx.delete_bucket(&chain(&["a"]), "b"))
            .unwrap();
        let err = engine
            .view(ROOT_KV, |tx| tx.get_leaf(&chain(&["a", "b"]), "x"))
            .unwrap_err();
        assert!(matches!(err, Error::BucketNotFound(_)));
        // sibling leaf untouched
        let got = engine
            .view(ROOT_KV, |tx| tx.get_leaf(&chain(&["a"]), "y"))
            .unwrap();
        assert!(got.is_some());
    }

    #[test]
    fn test_delete_missing_bucket_is_not_found() {
        let (_dir, engine) = open_engine();
        let err = engine
            .update(ROOT_KV, |tx| tx.delete_bucket(&[], "ghost"))
            .unwrap_err();
        assert!(matches!(err, Error::BucketNotFound(b) if b == "ghost"));
    }

    #[test]
    fn test_delete_leaf_is_idempotent() {
        let (_dir, engine) = open_engine();
        engine
            .update(ROOT_KV, |tx| tx.delete_leaf(&[], "never-existed"))
            .unwrap();
    }

    #[test]
    fn test_failed_update_discards_staged_writes() {
        let (_dir, engine) = open_engine();
        let result = engine.update(ROOT_KV, |tx| {
            tx.put_leaf(&[], "staged", b"{}")?;
            Err::<(), _>(Error::Internal("boom".into()))
        });
        assert!(result.is_err());
        let got = engine.view(ROOT_KV, |tx| tx.get_leaf(&[], "staged")).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn test_roots_are_isolated() {
        let (_dir, engine) = open_engine();
        engine
            .update(ROOT_KV, |tx| tx.put_leaf(&[], "k", b"{}"))
            .unwrap();
        let got = engine
            .view(ROOT_SYSTEM, |tx| tx.get_leaf(&[], "k"))
            .unwrap();
        assert!(got.is_none());
    }
}
