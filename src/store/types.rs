//! Stored and replicated record types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::common::base64_bytes;

/// How long a claimed lock stays valid
pub const LOCK_TTL_MINUTES: i64 = 5;

/// The persisted record wrapping a user value with its metadata.
///
/// `data` holds raw JSON when the original payload parsed as JSON, the raw
/// bytes otherwise (`plaintext` records which), and ciphertext when
/// `secret` is set. On the wire `data` travels base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(default = "min_timestamp")]
    pub last_updated: DateTime<Utc>,

    #[serde(default)]
    pub secret: bool,

    #[serde(default, with = "base64_bytes")]
    pub data: Vec<u8>,

    #[serde(default)]
    pub locks: Vec<Lock>,

    #[serde(default)]
    pub plaintext: bool,
}

fn min_timestamp() -> DateTime<Utc> {
    DateTime::<Utc>::MIN_UTC
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            last_updated: min_timestamp(),
            secret: false,
            data: Vec::new(),
            locks: Vec::new(),
            plaintext: false,
        }
    }
}

/// Advisory lock embedded in an envelope. The store never refuses writes on
/// a locked key; consumers observe `locks` and coordinate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lock {
    pub key: String,
    pub prefix: String,
    pub lock_id: String,
    pub node_id: String,
    pub node_address: String,
    pub claim_time: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
}

impl Lock {
    /// Claim a fresh lock on `key` under the root bucket `prefix`.
    pub fn claim(key: &str, prefix: &str, node_id: &str, node_address: &str) -> Self {
        let now = Utc::now();
        Self {
            key: key.to_string(),
            prefix: prefix.to_string(),
            lock_id: uuid::Uuid::new_v4().to_string(),
            node_id: node_id.to_string(),
            node_address: node_address.to_string(),
            claim_time: now,
            expire_time: now + Duration::minutes(LOCK_TTL_MINUTES),
        }
    }
}

/// Kind of a replicated mutation. Wire-compatible with the `verb:target`
/// string forms; anything unrecognised decodes to `Unknown` and is dropped
/// by the apply loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateType {
    #[serde(rename = "put:key")]
    PutKey,
    #[serde(rename = "delete:key")]
    DeleteKey,
    #[serde(rename = "delete:bucket")]
    DeleteBucket,
    #[serde(rename = "lock:create")]
    LockCreate,
    #[serde(rename = "lock:delete")]
    LockDelete,
    #[serde(other)]
    Unknown,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::PutKey => "put:key",
            UpdateType::DeleteKey => "delete:key",
            UpdateType::DeleteBucket => "delete:bucket",
            UpdateType::LockCreate => "lock:create",
            UpdateType::LockDelete => "lock:delete",
            UpdateType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for UpdateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire form of a replicated mutation. For `lock:delete` the envelope's
/// `data` carries the serialized [`Lock`] being released.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub update_type: UpdateType,
    pub key: String,
    pub value: Envelope,
}
