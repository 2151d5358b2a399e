//! Metrics collection
//!
//! Prometheus-compatible counters, gauges and histograms for:
//! - Resharding operation outcomes
//! - Phase transitions and phase durations
//! - Participant call retries
//! - HTTP request latency

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// Phase durations span seconds to hours
const PHASE_BUCKETS: [f64; 8] = [
    100.0, 1_000.0, 10_000.0, 60_000.0, 300_000.0, 900_000.0, 3_600_000.0, 14_400_000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with default latency buckets
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    /// Create a histogram with custom bucket boundaries
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // Stored as thousandths for precision
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with +Inf
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    /// Get sum of all observed values
    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Get count of observations
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn write_prometheus(&self, out: &mut String, name: &str, label: &str, value: &str) {
        use std::fmt::Write;
        for (le, count) in self.get_buckets() {
            let le = if le.is_infinite() {
                "+Inf".to_string()
            } else {
                le.to_string()
            };
            let _ = writeln!(out, "{name}_bucket{{{label}=\"{value}\",le=\"{le}\"}} {count}");
        }
        let _ = writeln!(out, "{name}_sum{{{label}=\"{value}\"}} {}", self.sum());
        let _ = writeln!(out, "{name}_count{{{label}=\"{value}\"}} {}", self.count());
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic counter
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

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
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

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per-phase metrics
#[derive(Debug)]
pub struct PhaseMetrics {
    pub entered: Counter,
    pub duration: Histogram,
}

impl PhaseMetrics {
    fn new() -> Self {
        Self {
            entered: Counter::new(),
            duration: Histogram::with_buckets(&PHASE_BUCKETS),
        }
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    phases: Mutex<BTreeMap<String, Arc<PhaseMetrics>>>,
    endpoints: Mutex<BTreeMap<String, Arc<Histogram>>>,

    pub operations_started: Counter,
    pub operations_succeeded: Counter,
    pub operations_failed: Counter,
    pub duplicate_submissions: Counter,
    pub recovered_operations: Counter,
    pub participant_retries: Counter,
    pub http_errors: Counter,
    pub documents_copied: Counter,

    pub active_instances: Gauge,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            phases: Mutex::new(BTreeMap::new()),
            endpoints: Mutex::new(BTreeMap::new()),
            operations_started: Counter::new(),
            operations_succeeded: Counter::new(),
            operations_failed: Counter::new(),
            duplicate_submissions: Counter::new(),
            recovered_operations: Counter::new(),
            participant_retries: Counter::new(),
            http_errors: Counter::new(),
            documents_copied: Counter::new(),
            active_instances: Gauge::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for a phase
    pub fn phase(&self, phase: &str) -> Arc<PhaseMetrics> {
        let mut phases = self.phases.lock().unwrap_or_else(|e| e.into_inner());
        phases
            .entry(phase.to_string())
            .or_insert_with(|| Arc::new(PhaseMetrics::new()))
            .clone()
    }

    /// Record the time spent in a phase that was just left
    pub fn record_phase(&self, phase: &str, elapsed: Duration) {
        self.phase(phase)
            .duration
            .observe(elapsed.as_secs_f64() * 1000.0);
    }

    /// Record an HTTP request
    pub fn record_request(&self, path: &str, duration: Duration, success: bool) {
        let histogram = {
            let mut endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
            endpoints
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(Histogram::new()))
                .clone()
        };
        histogram.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            self.http_errors.inc();
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        let counters = [
            (
                "minireshard_operations_started_total",
                "Resharding operations created",
                &self.operations_started,
            ),
            (
                "minireshard_operations_succeeded_total",
                "Resharding operations that reached done",
                &self.operations_succeeded,
            ),
            (
                "minireshard_operations_failed_total",
                "Resharding operations that reached error",
                &self.operations_failed,
            ),
            (
                "minireshard_duplicate_submissions_total",
                "Requests attached to an in-flight operation",
                &self.duplicate_submissions,
            ),
            (
                "minireshard_recovered_operations_total",
                "Operations resumed after a leadership change",
                &self.recovered_operations,
            ),
            (
                "minireshard_participant_retries_total",
                "Participant calls retried after a transient failure",
                &self.participant_retries,
            ),
            (
                "minireshard_http_errors_total",
                "HTTP requests answered with an error status",
                &self.http_errors,
            ),
            (
                "minireshard_documents_copied_total",
                "Documents cloned by completed operations",
                &self.documents_copied,
            ),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {}", counter.get());
        }

        out.push_str("# HELP minireshard_active_instances Coordinator instances currently running\n");
        out.push_str("# TYPE minireshard_active_instances gauge\n");
        let _ = writeln!(
            out,
            "minireshard_active_instances {}",
            self.active_instances.get()
        );

        out.push_str("# HELP minireshard_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE minireshard_uptime_seconds gauge\n");
        let _ = writeln!(out, "minireshard_uptime_seconds {}", self.uptime_seconds());

        let phases = self.phases.lock().unwrap_or_else(|e| e.into_inner());
        out.push_str("# HELP minireshard_phase_entered_total Phase transitions by target phase\n");
        out.push_str("# TYPE minireshard_phase_entered_total counter\n");
        for (phase, metrics) in phases.iter() {
            let _ = writeln!(
                out,
                "minireshard_phase_entered_total{{phase=\"{phase}\"}} {}",
                metrics.entered.get()
            );
        }
        out.push_str("# HELP minireshard_phase_duration_ms Time spent per phase\n");
        out.push_str("# TYPE minireshard_phase_duration_ms histogram\n");
        for (phase, metrics) in phases.iter() {
            metrics
                .duration
                .write_prometheus(&mut out, "minireshard_phase_duration_ms", "phase", phase);
        }
        drop(phases);

        let endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        out.push_str("# HELP minireshard_request_duration_ms Request duration in milliseconds\n");
        out.push_str("# TYPE minireshard_request_duration_ms histogram\n");
        for (path, latency) in endpoints.iter() {
            latency.write_prometheus(&mut out, "minireshard_request_duration_ms", "path", path);
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);
