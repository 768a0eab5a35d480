//! # Metric model.
//!
//! [`MetricSnapshot`] is the point-in-time form of one metric series, the
//! unit an envelope's `read_metrics` returns and the unit the status
//! surface exports. Snapshot ids identify a series for delta tracking and
//! must be unique across the deployment; [`MetricRegistry`] allocates ids
//! from a process-wide counter, and envelope implementations are expected
//! to do the equivalent on the worker side.
//!
//! Method-level series use the canonical names below, with `component`
//! and `method` labels; the stats processor aggregates exactly those.
//!
//! Series tracked by the supervisor's own registry:
//! - `appvisor_components_started`: components recorded via StartComponent
//! - `appvisor_replicas_registered`: distinct replica registrations
//! - `appvisor_listeners_exported`: distinct exported listeners

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Cumulative number of calls to a method.
pub const METHOD_CALLS: &str = "method_calls";
/// Cumulative latency of a method's calls, in microseconds.
pub const METHOD_LATENCY_MICROS: &str = "method_latency_micros";
/// Cumulative bytes received by a method (request payloads).
pub const METHOD_BYTES_REQUEST: &str = "method_bytes_request";
/// Cumulative bytes sent by a method (reply payloads).
pub const METHOD_BYTES_REPLY: &str = "method_bytes_reply";

/// Kind of a metric series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// Point-in-time value of one metric series.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Series id, unique across the deployment.
    pub id: u64,
    /// Metric name.
    pub name: String,
    pub typ: MetricType,
    /// Label set, sorted by key.
    pub labels: BTreeMap<String, String>,
    /// Current value; for counters, the cumulative total.
    pub value: f64,
}

static NEXT_SERIES_ID: AtomicU64 = AtomicU64::new(1);

/// A monotone counter handle.
#[derive(Clone)]
pub struct Counter {
    inner: Arc<CounterInner>,
}

struct CounterInner {
    id: u64,
    name: String,
    labels: BTreeMap<String, String>,
    // f64 bits; counters only ever grow.
    value: AtomicU64,
}

impl Counter {
    pub fn add(&self, delta: f64) {
        let mut curr = self.inner.value.load(Ordering::Relaxed);
        loop {
            let next = f64::from_bits(curr) + delta;
            match self.inner.value.compare_exchange_weak(
                curr,
                next.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(v) => curr = v,
            }
        }
    }

    pub fn inc(&self) {
        self.add(1.0)
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.inner.value.load(Ordering::Relaxed))
    }

    fn snapshot(&self) -> MetricSnapshot {
        MetricSnapshot {
            id: self.inner.id,
            name: self.inner.name.clone(),
            typ: MetricType::Counter,
            labels: self.inner.labels.clone(),
            value: self.get(),
        }
    }
}

/// Process-local registry for the supervisor's own series.
#[derive(Default)]
pub struct MetricRegistry {
    counters: Mutex<Vec<Counter>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (and returns a handle to) a counter series.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> Counter {
        let counter = Counter {
            inner: Arc::new(CounterInner {
                id: NEXT_SERIES_ID.fetch_add(1, Ordering::Relaxed),
                name: name.to_string(),
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                value: AtomicU64::new(0f64.to_bits()),
            }),
        };
        self.counters.lock().push(counter.clone());
        counter
    }

    /// Snapshots every registered series.
    pub fn snapshot(&self) -> Vec<MetricSnapshot> {
        self.counters.lock().iter().map(Counter::snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let reg = MetricRegistry::new();
        let c = reg.counter("appvisor_components_started", &[]);
        c.inc();
        c.add(2.5);
        assert_eq!(c.get(), 3.5);

        let snaps = reg.snapshot();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].name, "appvisor_components_started");
        assert_eq!(snaps[0].value, 3.5);
        assert_eq!(snaps[0].typ, MetricType::Counter);
    }

    #[test]
    fn series_ids_are_unique() {
        let reg = MetricRegistry::new();
        let a = reg.counter("x", &[("component", "pkg.Cache")]);
        let b = reg.counter("x", &[("component", "pkg.Frontend")]);
        let snaps = reg.snapshot();
        assert_ne!(snaps[0].id, snaps[1].id);
        let _ = (a, b);
    }
}
