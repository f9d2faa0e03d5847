// Metrics collection and tracking

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::gate::GateSnapshot;
use crate::stream::{StreamFailure, StreamOutcome, StreamSession};

const MAX_LATENCY_SAMPLES: usize = 1000;

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Mark process start for the uptime figure. Idempotent.
pub fn mark_start() {
    let _ = START_TIME.get_or_init(Instant::now);
}

/// Per-endpoint metrics. Latency is time until the response head is ready,
/// which for `/tts` is time to first audio segment.
#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    pub request_count: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
    pub total_latency_ms: Arc<AtomicU64>,
    pub min_latency_ms: Arc<AtomicU64>,
    pub max_latency_ms: Arc<AtomicU64>,
    latency_samples: Arc<Mutex<VecDeque<u64>>>,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            total_latency_ms: Arc::new(AtomicU64::new(0)),
            min_latency_ms: Arc::new(AtomicU64::new(u64::MAX)),
            max_latency_ms: Arc::new(AtomicU64::new(0)),
            latency_samples: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_LATENCY_SAMPLES))),
        }
    }

    pub fn record_request(&self, latency_ms: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_latency_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            if samples.len() == MAX_LATENCY_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(latency_ms);
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.request_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    pub fn min_latency(&self) -> u64 {
        match self.min_latency_ms.load(Ordering::Relaxed) {
            u64::MAX => 0,
            v => v,
        }
    }

    fn percentile(&self, p: u8) -> u64 {
        let Ok(samples) = self.latency_samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn stats(&self) -> EndpointStats {
        EndpointStats {
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            min_latency_ms: self.min_latency(),
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: self.percentile(50),
            p95_latency_ms: self.percentile(95),
            p99_latency_ms: self.percentile(99),
        }
    }
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for responses that made it past the first segment.
#[derive(Debug, Clone, Default)]
pub struct StreamMetrics {
    pub started: Arc<AtomicU64>,
    pub completed: Arc<AtomicU64>,
    pub failed_synthesis: Arc<AtomicU64>,
    pub disconnected: Arc<AtomicU64>,
    pub segments_total: Arc<AtomicU64>,
    pub bytes_total: Arc<AtomicU64>,
}

impl StreamMetrics {
    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finished(&self, session: &StreamSession, outcome: &StreamOutcome) {
        let counter = match outcome {
            StreamOutcome::Completed => &self.completed,
            StreamOutcome::Failed(StreamFailure::Synthesis(_)) => &self.failed_synthesis,
            StreamOutcome::Failed(StreamFailure::Transport(_)) => &self.disconnected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.segments_total
            .fetch_add(session.segments_written() as u64, Ordering::Relaxed);
        self.bytes_total
            .fetch_add(session.bytes_written(), Ordering::Relaxed);
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed_synthesis: self.failed_synthesis.load(Ordering::Relaxed),
            disconnected: self.disconnected.load(Ordering::Relaxed),
            segments_total: self.segments_total.load(Ordering::Relaxed),
            bytes_total: self.bytes_total.load(Ordering::Relaxed),
        }
    }
}

/// Comprehensive metrics structure
#[derive(Debug, Clone, Default)]
pub struct AppMetrics {
    pub tts: EndpointMetrics,
    pub streams: StreamMetrics,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Serialize)]
pub struct DetailedMetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub engine: &'static str,
    pub system: SystemMetrics,
    pub tts: EndpointStats,
    pub streams: StreamStats,
    pub gate: GateSnapshot,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

impl SystemMetrics {
    pub fn collect() -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_cpu();
        system.refresh_memory();

        let memory_used = system.used_memory();
        let memory_total = system.total_memory();
        let memory_usage_percent = if memory_total > 0 {
            (memory_used as f64 / memory_total as f64 * 100.0) as f32
        } else {
            0.0
        };

        let system_load = {
            #[cfg(unix)]
            {
                std::fs::read_to_string("/proc/loadavg")
                    .ok()
                    .and_then(|s| s.split_whitespace().next().and_then(|v| v.parse().ok()))
            }
            #[cfg(not(unix))]
            None
        };

        Self {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            uptime_seconds: START_TIME.get().map(|s| s.elapsed().as_secs()).unwrap_or(0),
            system_load,
        }
    }
}

#[derive(Serialize)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
}

#[derive(Serialize)]
pub struct StreamStats {
    pub started: u64,
    pub completed: u64,
    pub failed_synthesis: u64,
    pub disconnected: u64,
    pub segments_total: u64,
    pub bytes_total: u64,
}
