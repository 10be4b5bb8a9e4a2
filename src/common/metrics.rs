//! Metrics collection
//!
//! A small Prometheus-compatible registry. The store records transaction
//! durations and database size after every operation; the update loop
//! publishes its queue depth on each iteration.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Counter for monotonically increasing values
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge keyed by a label value, e.g. transaction durations by type
#[derive(Debug, Default)]
pub struct LabeledGauge {
    values: Mutex<HashMap<String, u64>>,
}

impl LabeledGauge {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, label: &str, v: u64) {
        self.values.lock().unwrap().insert(label.to_string(), v);
    }

    pub fn get(&self, label: &str) -> Option<u64> {
        self.values.lock().unwrap().get(label).copied()
    }

    fn snapshot(&self) -> Vec<(String, u64)> {
        let mut entries: Vec<_> = self
            .values
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries.sort();
        entries
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    /// Duration of the last store transaction, by operation type
    pub transaction_time_ms: LabeledGauge,

    /// Size of the database on disk
    pub db_size_bytes: Gauge,

    /// Depth of the inbound update queue
    pub update_queue_size: Gauge,

    /// Outbound updates handed to the cluster transport
    pub updates_emitted: Counter,

    /// Inbound updates applied to the store
    pub updates_applied: Counter,

    /// Updates dropped because a channel was full
    pub updates_dropped: Counter,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            transaction_time_ms: LabeledGauge::new(),
            db_size_bytes: Gauge::new(),
            update_queue_size: Gauge::new(),
            updates_emitted: Counter::new(),
            updates_applied: Counter::new(),
            updates_dropped: Counter::new(),
            start_time: Instant::now(),
        }
    }

    /// Uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        out.push_str("# HELP warren_kv_transaction_time_ms Duration of transactions by type\n");
        out.push_str("# TYPE warren_kv_transaction_time_ms gauge\n");
        for (label, value) in self.transaction_time_ms.snapshot() {
            writeln!(
                out,
                "warren_kv_transaction_time_ms{{type=\"{}\"}} {}",
                label, value
            )
            .unwrap();
        }

        out.push_str("# HELP warren_kv_size_bytes Size in bytes of the database on disk\n");
        out.push_str("# TYPE warren_kv_size_bytes gauge\n");
        writeln!(out, "warren_kv_size_bytes {}", self.db_size_bytes.get()).unwrap();

        out.push_str("# HELP warren_kv_update_queue_size Length of the update queue\n");
        out.push_str("# TYPE warren_kv_update_queue_size gauge\n");
        writeln!(
            out,
            "warren_kv_update_queue_size {}",
            self.update_queue_size.get()
        )
        .unwrap();

        out.push_str("# HELP warren_kv_updates_emitted_total Updates emitted to the cluster\n");
        out.push_str("# TYPE warren_kv_updates_emitted_total counter\n");
        writeln!(
            out,
            "warren_kv_updates_emitted_total {}",
            self.updates_emitted.get()
        )
        .unwrap();

        out.push_str("# HELP warren_kv_updates_applied_total Inbound updates applied\n");
        out.push_str("# TYPE warren_kv_updates_applied_total counter\n");
        writeln!(
            out,
            "warren_kv_updates_applied_total {}",
            self.updates_applied.get()
        )
        .unwrap();

        out.push_str("# HELP warren_kv_updates_dropped_total Updates dropped under pressure\n");
        out.push_str("# TYPE warren_kv_updates_dropped_total counter\n");
        writeln!(
            out,
            "warren_kv_updates_dropped_total {}",
            self.updates_dropped.get()
        )
        .unwrap();

        out.push_str("# HELP warren_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE warren_uptime_seconds gauge\n");
        writeln!(out, "warren_uptime_seconds {}", self.uptime_seconds()).unwrap();

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: Lazy<MetricsRegistry> = Lazy::new(MetricsRegistry::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);
        counter.inc();
        counter.inc();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new();
        gauge.set(42);
        assert_eq!(gauge.get(), 42);
        gauge.set(7);
        assert_eq!(gauge.get(), 7);
    }

    #[test]
    fn test_labeled_gauge() {
        let gauge = LabeledGauge::new();
        gauge.set("put:key", 3);
        gauge.set("get:key", 1);
        gauge.set("put:key", 5);
        assert_eq!(gauge.get("put:key"), Some(5));
        assert_eq!(gauge.get("get:key"), Some(1));
        assert_eq!(gauge.get("missing"), None);
    }

    #[test]
    fn test_prometheus_output() {
        let registry = MetricsRegistry::new();
        registry.transaction_time_ms.set("put:key", 12);
        registry.db_size_bytes.set(4096);
        registry.updates_emitted.inc();

        let out = registry.to_prometheus();
        assert!(out.contains("warren_kv_transaction_time_ms{type=\"put:key\"} 12"));
        assert!(out.contains("warren_kv_size_bytes 4096"));
        assert!(out.contains("warren_kv_updates_emitted_total 1"));
    }
}
