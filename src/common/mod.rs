//! Common utilities and types shared across warren

pub mod config;
pub mod crypto;
pub mod error;
pub mod metrics;

pub use config::{ApiConfig, ClusterConfig, Config, KvConfig, Mode, PerfConfig, SslConfig};
pub use crypto::SharedKey;
pub use error::{Error, Result};
pub use metrics::METRICS;

/// Serde adapter encoding `Vec<u8>` as a base64 string on the wire, the
/// framing peers and older releases expect for binary payloads. `null`
/// decodes to an empty vector.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(Vec::new()),
            Some(s) => BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom),
        }
    }
}
