//! # Stats processor: per-method rolling aggregations.
//!
//! Once a second the processor pulls metric snapshots from every live
//! worker (plus the supervisor's own registry) through an injected
//! `read_metrics` closure and folds the per-method counter deltas into
//! three windows per `(component, method)`:
//!
//! - **minute**: sliding 60-second window,
//! - **hour**: sliding 60-minute window,
//! - **total**: lifetime counters.
//!
//! The processor never talks to workers directly; it is a pure
//! aggregator over whatever the closure returns. Counters are cumulative,
//! so each series' delta is tracked by its snapshot id.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::logging::shorten_component;
use crate::metrics::{
    MetricSnapshot, METHOD_BYTES_REPLY, METHOD_BYTES_REQUEST, METHOD_CALLS, METHOD_LATENCY_MICROS,
};

/// Sampling interval of the collection loop.
const COLLECT_INTERVAL: Duration = Duration::from_secs(1);

/// Ticks per minute-window bucket rotation of the hour ring.
const TICKS_PER_MINUTE: u64 = 60;

/// Aggregated statistics for one method over one window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodStats {
    pub num_calls: f64,
    pub avg_latency_ms: f64,
    pub recv_kb_per_sec: f64,
    pub sent_kb_per_sec: f64,
}

/// Minute/hour/total statistics for one method.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodSummary {
    /// Method name.
    pub name: String,
    pub minute: MethodStats,
    pub hour: MethodStats,
    pub total: MethodStats,
}

/// Raw per-window accumulator.
#[derive(Clone, Copy, Debug, Default)]
struct Sample {
    calls: f64,
    latency_micros: f64,
    recv_bytes: f64,
    sent_bytes: f64,
}

impl Sample {
    fn add(&mut self, other: &Sample) {
        self.calls += other.calls;
        self.latency_micros += other.latency_micros;
        self.recv_bytes += other.recv_bytes;
        self.sent_bytes += other.sent_bytes;
    }

    /// Converts the accumulator into stats over a window of
    /// `window_secs`.
    fn stats(&self, window_secs: f64) -> MethodStats {
        let avg_latency_ms = if self.calls > 0.0 {
            self.latency_micros / 1000.0 / self.calls
        } else {
            0.0
        };
        let (recv, sent) = if window_secs > 0.0 {
            (
                self.recv_bytes / 1024.0 / window_secs,
                self.sent_bytes / 1024.0 / window_secs,
            )
        } else {
            (0.0, 0.0)
        };
        MethodStats {
            num_calls: self.calls,
            avg_latency_ms,
            recv_kb_per_sec: recv,
            sent_kb_per_sec: sent,
        }
    }
}

/// Fixed-size ring of per-bucket accumulators.
struct Ring {
    buckets: Vec<Sample>,
    head: usize,
}

impl Ring {
    fn new(len: usize) -> Self {
        Self {
            buckets: vec![Sample::default(); len],
            head: 0,
        }
    }

    /// Rotates a fresh bucket in, discarding the oldest.
    fn advance(&mut self) {
        self.head = (self.head + 1) % self.buckets.len();
        self.buckets[self.head] = Sample::default();
    }

    fn current(&mut self) -> &mut Sample {
        &mut self.buckets[self.head]
    }

    fn sum(&self) -> Sample {
        let mut total = Sample::default();
        for b in &self.buckets {
            total.add(b);
        }
        total
    }
}

/// Rolling windows for one `(component, method)` pair.
struct MethodWindows {
    minute: Ring,
    hour: Ring,
    total: Sample,
}

impl MethodWindows {
    fn new() -> Self {
        Self {
            minute: Ring::new(60),
            hour: Ring::new(60),
            total: Sample::default(),
        }
    }
}

struct Inner {
    /// Ticks ingested so far; each tick is one `COLLECT_INTERVAL`.
    ticks: u64,
    /// Last cumulative value per series id, for delta computation.
    prev: HashMap<u64, f64>,
    /// Windows keyed by `(component, method)` (fully-qualified
    /// component).
    methods: HashMap<(String, String), MethodWindows>,
}

/// Tracks and aggregates per-method stats for the status surface.
pub struct StatsProcessor {
    inner: Mutex<Inner>,
}

impl Default for StatsProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsProcessor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ticks: 0,
                prev: HashMap::new(),
                methods: HashMap::new(),
            }),
        }
    }

    /// Collection loop: samples `read_metrics` once per interval until
    /// `ctx` is cancelled.
    pub async fn collect<F, Fut>(&self, ctx: CancellationToken, read_metrics: F)
    where
        F: Fn() -> Fut + Send,
        Fut: Future<Output = Vec<MetricSnapshot>> + Send,
    {
        let mut ticker = tokio::time::interval(COLLECT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let snapshots = read_metrics().await;
            self.ingest(&snapshots);
        }
    }

    /// Folds one batch of snapshots into the windows, advancing every
    /// window by one tick.
    pub fn ingest(&self, snapshots: &[MetricSnapshot]) {
        let mut inner = self.inner.lock();
        inner.ticks += 1;
        let ticks = inner.ticks;
        let rotate_hour = ticks > 1 && (ticks - 1) % TICKS_PER_MINUTE == 0;
        if ticks > 1 {
            for windows in inner.methods.values_mut() {
                windows.minute.advance();
                if rotate_hour {
                    windows.hour.advance();
                }
            }
        }

        for snap in snapshots {
            let (Some(component), Some(method)) =
                (snap.labels.get("component"), snap.labels.get("method"))
            else {
                continue;
            };

            let mut delta = Sample::default();
            match snap.name.as_str() {
                METHOD_CALLS => delta.calls = 1.0,
                METHOD_LATENCY_MICROS => delta.latency_micros = 1.0,
                METHOD_BYTES_REQUEST => delta.recv_bytes = 1.0,
                METHOD_BYTES_REPLY => delta.sent_bytes = 1.0,
                _ => continue,
            }

            let prev = inner.prev.insert(snap.id, snap.value).unwrap_or(0.0);
            // Counters only grow; a shrinking value means a new series
            // reused an id, so start it over.
            let step = (snap.value - prev).max(0.0);
            delta.calls *= step;
            delta.latency_micros *= step;
            delta.recv_bytes *= step;
            delta.sent_bytes *= step;

            let key = (component.clone(), method.clone());
            let windows = inner
                .methods
                .entry(key)
                .or_insert_with(MethodWindows::new);
            windows.minute.current().add(&delta);
            windows.hour.current().add(&delta);
            windows.total.add(&delta);
        }
    }

    /// Per-method summaries keyed by **short** component name, the shape
    /// the statusz join consumes.
    pub fn statusz_snapshot(&self) -> HashMap<String, Vec<MethodSummary>> {
        let inner = self.inner.lock();
        let interval = COLLECT_INTERVAL.as_secs_f64();
        let minute_secs = (inner.ticks.min(60) as f64) * interval;
        let hour_secs = (inner.ticks.min(3600) as f64) * interval;
        let total_secs = inner.ticks as f64 * interval;

        let mut out: HashMap<String, Vec<MethodSummary>> = HashMap::new();
        for ((component, method), windows) in &inner.methods {
            out.entry(shorten_component(component).to_string())
                .or_default()
                .push(MethodSummary {
                    name: method.clone(),
                    minute: windows.minute.sum().stats(minute_secs),
                    hour: windows.hour.sum().stats(hour_secs),
                    total: windows.total.stats(total_secs),
                });
        }
        for summaries in out.values_mut() {
            summaries.sort_by(|a, b| a.name.cmp(&b.name));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::metrics::MetricType;

    fn snap(id: u64, name: &str, component: &str, method: &str, value: f64) -> MetricSnapshot {
        let mut labels = BTreeMap::new();
        labels.insert("component".to_string(), component.to_string());
        labels.insert("method".to_string(), method.to_string());
        MetricSnapshot {
            id,
            name: name.to_string(),
            typ: MetricType::Counter,
            labels,
            value,
        }
    }

    #[test]
    fn counts_deltas_not_totals() {
        let stats = StatsProcessor::new();
        stats.ingest(&[snap(1, METHOD_CALLS, "pkg.Cache", "Get", 40.0)]);
        stats.ingest(&[snap(1, METHOD_CALLS, "pkg.Cache", "Get", 42.0)]);

        let statusz = stats.statusz_snapshot();
        let cache = &statusz["Cache"];
        assert_eq!(cache.len(), 1);
        assert_eq!(cache[0].name, "Get");
        assert_eq!(cache[0].minute.num_calls, 42.0);
        assert_eq!(cache[0].total.num_calls, 42.0);
    }

    #[test]
    fn average_latency_is_per_call() {
        let stats = StatsProcessor::new();
        stats.ingest(&[
            snap(1, METHOD_CALLS, "pkg.Cache", "Get", 4.0),
            snap(2, METHOD_LATENCY_MICROS, "pkg.Cache", "Get", 8000.0),
        ]);
        let statusz = stats.statusz_snapshot();
        let get = &statusz["Cache"][0];
        assert_eq!(get.minute.num_calls, 4.0);
        assert_eq!(get.minute.avg_latency_ms, 2.0);
    }

    #[test]
    fn minute_window_slides_out_old_samples() {
        let stats = StatsProcessor::new();
        stats.ingest(&[snap(1, METHOD_CALLS, "pkg.Cache", "Get", 10.0)]);
        // 60 more empty ticks push the burst out of the minute window.
        for _ in 0..60 {
            stats.ingest(&[snap(1, METHOD_CALLS, "pkg.Cache", "Get", 10.0)]);
        }
        let statusz = stats.statusz_snapshot();
        let get = &statusz["Cache"][0];
        assert_eq!(get.minute.num_calls, 0.0);
        assert_eq!(get.hour.num_calls, 10.0);
        assert_eq!(get.total.num_calls, 10.0);
    }

    #[test]
    fn throughput_uses_elapsed_window() {
        let stats = StatsProcessor::new();
        stats.ingest(&[snap(1, METHOD_BYTES_REQUEST, "pkg.Cache", "Get", 2048.0)]);
        stats.ingest(&[snap(1, METHOD_BYTES_REQUEST, "pkg.Cache", "Get", 4096.0)]);
        let statusz = stats.statusz_snapshot();
        let get = &statusz["Cache"][0];
        // 4 KiB over 2 elapsed seconds.
        assert_eq!(get.minute.recv_kb_per_sec, 2.0);
    }

    #[test]
    fn methods_grouped_by_short_component_name() {
        let stats = StatsProcessor::new();
        stats.ingest(&[
            snap(1, METHOD_CALLS, "pkg.Cache", "Get", 1.0),
            snap(2, METHOD_CALLS, "pkg.Cache", "Put", 2.0),
            snap(3, METHOD_CALLS, "pkg.Frontend", "Serve", 3.0),
        ]);
        let statusz = stats.statusz_snapshot();
        assert_eq!(statusz["Cache"].len(), 2);
        assert_eq!(statusz["Frontend"].len(), 1);
        // Sorted by method name.
        assert_eq!(statusz["Cache"][0].name, "Get");
        assert_eq!(statusz["Cache"][1].name, "Put");
    }

    #[test]
    fn unlabeled_series_are_ignored() {
        let stats = StatsProcessor::new();
        let mut unlabeled = snap(1, METHOD_CALLS, "pkg.Cache", "Get", 5.0);
        unlabeled.labels.clear();
        stats.ingest(&[unlabeled]);
        assert!(stats.statusz_snapshot().is_empty());
    }
}
