//! Process and host resource gauges.
//!
//! On Linux the probe reads `/proc/self/stat`, `/proc/self/status` and
//! `/proc/meminfo`; elsewhere every reading is zero.

use crate::metrics::{Gauge, MetricRegistry};
use edge_protocol::ProcessMetricsEvent;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

pub const CPU_PERCENT_GAUGE: &str = "process.cpuPercent";
pub const USED_MEMORY_GAUGE: &str = "process.usedMemory";
pub const TOTAL_MEMORY_GAUGE: &str = "host.totalMemory";
pub const THREADS_GAUGE: &str = "process.threads";
pub const UPTIME_GAUGE: &str = "process.uptimeMillis";

/// Kernel clock ticks per second used by `/proc/<pid>/stat` times.
const CLOCK_TICKS_PER_SECOND: f64 = 100.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMetricsSnapshot {
    pub cpu_percent: f64,
    pub used_memory: u64,
    pub total_memory: u64,
    pub threads: u64,
    pub uptime_millis: u64,
}

impl From<ProcessMetricsSnapshot> for ProcessMetricsEvent {
    fn from(snapshot: ProcessMetricsSnapshot) -> Self {
        ProcessMetricsEvent {
            cpu_load: snapshot.cpu_percent,
            used_memory: snapshot.used_memory,
        }
    }
}

#[derive(Debug)]
pub struct ProcessMetricsProbe {
    started: Instant,
    last_cpu: Mutex<Option<(u64, Instant)>>,
    cpu: Gauge,
    used_memory: Gauge,
    total_memory: Gauge,
    threads: Gauge,
    uptime: Gauge,
    latest: Mutex<ProcessMetricsSnapshot>,
}

impl ProcessMetricsProbe {
    pub fn new(metrics: &MetricRegistry) -> Self {
        Self {
            started: Instant::now(),
            last_cpu: Mutex::new(None),
            cpu: metrics.gauge(CPU_PERCENT_GAUGE),
            used_memory: metrics.gauge(USED_MEMORY_GAUGE),
            total_memory: metrics.gauge(TOTAL_MEMORY_GAUGE),
            threads: metrics.gauge(THREADS_GAUGE),
            uptime: metrics.gauge(UPTIME_GAUGE),
            latest: Mutex::new(ProcessMetricsSnapshot::default()),
        }
    }

    /// Takes a new reading and updates the gauges.
    pub fn refresh(&self) -> ProcessMetricsSnapshot {
        let now = Instant::now();
        let (used_memory, threads) = read_status().unwrap_or((0, 0));
        let snapshot = ProcessMetricsSnapshot {
            cpu_percent: self.cpu_percent(now),
            used_memory,
            total_memory: read_total_memory().unwrap_or(0),
            threads,
            uptime_millis: now.duration_since(self.started).as_millis() as u64,
        };

        self.cpu.set(snapshot.cpu_percent);
        self.used_memory.set(snapshot.used_memory as f64);
        self.total_memory.set(snapshot.total_memory as f64);
        self.threads.set(snapshot.threads as f64);
        self.uptime.set(snapshot.uptime_millis as f64);
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
        snapshot
    }

    /// Reading from the last refresh.
    pub fn latest(&self) -> ProcessMetricsSnapshot {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// CPU used since the previous reading, as a percentage of one core.
    fn cpu_percent(&self, now: Instant) -> f64 {
        let Some(ticks) = read_cpu_ticks() else {
            return 0.0;
        };
        let mut last = self.last_cpu.lock().unwrap_or_else(PoisonError::into_inner);
        let percent = match *last {
            Some((last_ticks, at)) => {
                let elapsed = now.duration_since(at).as_secs_f64();
                if elapsed > 0.0 {
                    let used = ticks.saturating_sub(last_ticks) as f64 / CLOCK_TICKS_PER_SECOND;
                    used / elapsed * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        *last = Some((ticks, now));
        percent
    }
}

// ============================================================================
// /proc readers
// ============================================================================

#[cfg(target_os = "linux")]
fn read_cpu_ticks() -> Option<u64> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    parse_cpu_ticks(&stat)
}

#[cfg(not(target_os = "linux"))]
fn read_cpu_ticks() -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn read_status() -> Option<(u64, u64)> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    Some(parse_status(&status))
}

#[cfg(not(target_os = "linux"))]
fn read_status() -> Option<(u64, u64)> {
    None
}

#[cfg(target_os = "linux")]
fn read_total_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    meminfo
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(parse_kib_line)
}

#[cfg(not(target_os = "linux"))]
fn read_total_memory() -> Option<u64> {
    None
}

/// utime + stime from a `/proc/<pid>/stat` line. The command name may
/// contain spaces, so fields are counted after the closing parenthesis.
fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

/// Resident bytes and thread count from `/proc/<pid>/status`.
fn parse_status(status: &str) -> (u64, u64) {
    let mut rss = 0;
    let mut threads = 0;
    for line in status.lines() {
        if line.starts_with("VmRSS:") {
            rss = parse_kib_line(line).unwrap_or(0);
        } else if let Some(value) = line.strip_prefix("Threads:") {
            threads = value.trim().parse().unwrap_or(0);
        }
    }
    (rss, threads)
}

/// `Name:   1234 kB` → bytes.
fn parse_kib_line(line: &str) -> Option<u64> {
    let value = line.split(':').nth(1)?.split_whitespace().next()?;
    value.parse::<u64>().ok().map(|kib| kib * 1024)
}
