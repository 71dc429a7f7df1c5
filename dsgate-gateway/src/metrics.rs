//! # Metrics Module
//!
//! In-memory request metrics for the gateway process.
//!
//! ## Overview
//!
//! The metrics middleware records one sample per completed request
//! (method, path, status, latency). The collector keeps a bounded window
//! of samples, ages them out past the retention duration, and aggregates
//! them on demand for the admin metrics endpoint.
//!
//! Nothing here persists across restarts; metrics are transient process
//! state by design.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Collector configuration, derived from the gateway config.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub max_requests: usize,
    pub retention_duration: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 10_000,
            retention_duration: Duration::from_secs(24 * 3600),
        }
    }
}

/// One completed request.
#[derive(Debug, Clone)]
pub struct RequestSample {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub latency: Duration,
    recorded_at: Instant,
}

impl RequestSample {
    pub fn new(method: String, path: String, status: u16, latency: Duration) -> Self {
        Self {
            method,
            path,
            status,
            latency,
            recorded_at: Instant::now(),
        }
    }
}

/// Aggregated view served by the admin metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedMetrics {
    pub total_requests: u64,
    pub requests_in_window: usize,
    pub success_count: usize,
    pub client_error_count: usize,
    pub server_error_count: usize,
    pub rate_limited_count: usize,
    pub average_latency_ms: f64,
    pub uptime_seconds: u64,
}

struct Collector {
    config: MetricsConfig,
    samples: RwLock<VecDeque<RequestSample>>,
    total: std::sync::atomic::AtomicU64,
    started_at: Instant,
}

static COLLECTOR: OnceLock<Arc<Collector>> = OnceLock::new();

fn collector() -> &'static Arc<Collector> {
    COLLECTOR.get_or_init(|| {
        Arc::new(Collector {
            config: MetricsConfig::default(),
            samples: RwLock::new(VecDeque::new()),
            total: std::sync::atomic::AtomicU64::new(0),
            started_at: Instant::now(),
        })
    })
}

/// Install the collector configuration and start the retention sweeper.
///
/// Later calls are no-ops: the first initialization wins, matching the
/// process-singleton role of the collector.
pub async fn initialize_metrics(config: MetricsConfig) {
    let initialized = COLLECTOR
        .set(Arc::new(Collector {
            config,
            samples: RwLock::new(VecDeque::new()),
            total: std::sync::atomic::AtomicU64::new(0),
            started_at: Instant::now(),
        }))
        .is_ok();

    if initialized {
        let collector = collector().clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(600));
            interval.tick().await;
            loop {
                interval.tick().await;
                let retention = collector.config.retention_duration;
                let mut samples = collector.samples.write().await;
                while samples
                    .front()
                    .map(|s| s.recorded_at.elapsed() > retention)
                    .unwrap_or(false)
                {
                    samples.pop_front();
                }
            }
        });
    }
}

/// Record one completed request.
pub async fn record_request(sample: RequestSample) {
    let collector = collector();
    if !collector.config.enabled {
        return;
    }

    collector
        .total
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let mut samples = collector.samples.write().await;
    if samples.len() >= collector.config.max_requests {
        samples.pop_front();
    }
    samples.push_back(sample);
}

/// Aggregate the current sample window.
pub async fn get_aggregated_metrics() -> AggregatedMetrics {
    let collector = collector();
    let samples = collector.samples.read().await;

    let mut success = 0usize;
    let mut client_error = 0usize;
    let mut server_error = 0usize;
    let mut rate_limited = 0usize;
    let mut latency_total = Duration::ZERO;

    for sample in samples.iter() {
        match sample.status {
            429 => rate_limited += 1,
            200..=399 => success += 1,
            400..=499 => client_error += 1,
            _ => server_error += 1,
        }
        latency_total += sample.latency;
    }

    let average_latency_ms = if samples.is_empty() {
        0.0
    } else {
        latency_total.as_secs_f64() * 1000.0 / samples.len() as f64
    };

    AggregatedMetrics {
        total_requests: collector.total.load(std::sync::atomic::Ordering::Relaxed),
        requests_in_window: samples.len(),
        success_count: success,
        client_error_count: client_error,
        server_error_count: server_error,
        rate_limited_count: rate_limited,
        average_latency_ms,
        uptime_seconds: collector.started_at.elapsed().as_secs(),
    }
}
