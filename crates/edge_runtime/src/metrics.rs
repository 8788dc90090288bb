//! Metric registry for one pipeline (or the process probe).
//!
//! Counters, gauges and timers are named and created on first use. Every
//! handle is a clone of an atomic cell, so stages update metrics without
//! taking the registry lock; the lock only guards name lookup.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Monotonic counter.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    #[inline]
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Last-value gauge holding an `f64` (stored as bits).
#[derive(Debug, Clone, Default)]
pub struct Gauge(Arc<AtomicU64>);

impl Gauge {
    #[inline]
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Default)]
struct TimerCell {
    count: AtomicU64,
    total_us: AtomicU64,
    max_us: AtomicU64,
}

/// Duration accumulator (count, cumulative and max microseconds).
#[derive(Debug, Clone, Default)]
pub struct Timer(Arc<TimerCell>);

impl Timer {
    #[inline]
    pub fn record(&self, elapsed: Duration) {
        let us = elapsed.as_micros() as u64;
        self.0.count.fetch_add(1, Ordering::Relaxed);
        self.0.total_us.fetch_add(us, Ordering::Relaxed);
        self.0.max_us.fetch_max(us, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_since(&self, start: Instant) {
        self.record(start.elapsed());
    }

    pub fn count(&self) -> u64 {
        self.0.count.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> TimerSnapshot {
        let count = self.count();
        let total_us = self.0.total_us.load(Ordering::Relaxed);
        TimerSnapshot {
            count,
            mean_ms: if count == 0 {
                0.0
            } else {
                total_us as f64 / count as f64 / 1000.0
            },
            max_ms: self.0.max_us.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub count: u64,
    pub mean_ms: f64,
    pub max_ms: f64,
}

/// Point-in-time copy of every metric in a registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub timers: BTreeMap<String, TimerSnapshot>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> f64 {
        self.gauges.get(name).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Default)]
struct Metrics {
    counters: BTreeMap<String, Counter>,
    gauges: BTreeMap<String, Gauge>,
    timers: BTreeMap<String, Timer>,
}

#[derive(Debug, Clone, Default)]
pub struct MetricRegistry {
    inner: Arc<RwLock<Metrics>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> Counter {
        if let Some(counter) = self.read().counters.get(name) {
            return counter.clone();
        }
        self.write()
            .counters
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn gauge(&self, name: &str) -> Gauge {
        if let Some(gauge) = self.read().gauges.get(name) {
            return gauge.clone();
        }
        self.write()
            .gauges
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn timer(&self, name: &str) -> Timer {
        if let Some(timer) = self.read().timers.get(name) {
            return timer.clone();
        }
        self.write()
            .timers
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let metrics = self.read();
        MetricsSnapshot {
            counters: metrics
                .counters
                .iter()
                .map(|(name, c)| (name.clone(), c.get()))
                .collect(),
            gauges: metrics
                .gauges
                .iter()
                .map(|(name, g)| (name.clone(), g.get()))
                .collect(),
            timers: metrics
                .timers
                .iter()
                .map(|(name, t)| (name.clone(), t.snapshot()))
                .collect(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Metrics> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Metrics> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_share_cells() {
        let registry = MetricRegistry::new();
        registry.counter("pipeline.batchCount").inc();
        registry.counter("pipeline.batchCount").add(2);
        registry.gauge("process.threads").set(7.0);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.counter("pipeline.batchCount"), 3);
        assert_eq!(snapshot.gauge("process.threads"), 7.0);
        assert_eq!(snapshot.counter("missing"), 0);
    }

    #[test]
    fn test_timer_snapshot() {
        let registry = MetricRegistry::new();
        let timer = registry.timer("stage.t.batchProcessing");
        timer.record(Duration::from_millis(2));
        timer.record(Duration::from_millis(4));

        let snapshot = registry.snapshot();
        let t = snapshot.timers["stage.t.batchProcessing"];
        assert_eq!(t.count, 2);
        assert!((t.mean_ms - 3.0).abs() < f64::EPSILON);
        assert!((t.max_ms - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clone_shares_registry() {
        let registry = MetricRegistry::new();
        let clone = registry.clone();
        clone.counter("a").inc();
        assert_eq!(registry.snapshot().counter("a"), 1);
    }
}
