//! Prometheus-compatible metrics endpoint
//!
//! Exposes late-join counters in Prometheus text format.
//! Default endpoint: http://localhost:9090/metrics

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::latejoin::join::{AbortReason, JoinOutcome};
use crate::latejoin::placement::PlacementError;

const TICK_HISTORY: usize = 1000;

/// Metrics registry for the late-join host
#[derive(Debug)]
pub struct Metrics {
    // Join lifecycle
    pub joins_started: AtomicU64,
    pub joins_ignored: AtomicU64,
    pub placements_completed: AtomicU64,
    pub dead_restored: AtomicU64,
    pub reconcilers_in_flight: AtomicU64,

    // Aborts by reason
    pub aborts_entity_timeout: AtomicU64,
    pub aborts_data_timeout: AtomicU64,
    pub aborts_no_target: AtomicU64,
    pub aborts_entity_lost: AtomicU64,
    pub aborts_placement: AtomicU64,

    // Replication
    pub status_writes: AtomicU64,
    pub status_write_failures: AtomicU64,
    pub warp_commands_sent: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            joins_started: AtomicU64::new(0),
            joins_ignored: AtomicU64::new(0),
            placements_completed: AtomicU64::new(0),
            dead_restored: AtomicU64::new(0),
            reconcilers_in_flight: AtomicU64::new(0),
            aborts_entity_timeout: AtomicU64::new(0),
            aborts_data_timeout: AtomicU64::new(0),
            aborts_no_target: AtomicU64::new(0),
            aborts_entity_lost: AtomicU64::new(0),
            aborts_placement: AtomicU64::new(0),
            status_writes: AtomicU64::new(0),
            status_write_failures: AtomicU64::new(0),
            warp_commands_sent: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
        }
    }

    /// Count a finished reconciliation
    pub fn record_outcome(&self, outcome: &JoinOutcome) {
        match outcome {
            JoinOutcome::RestoredDead => {
                self.dead_restored.fetch_add(1, Ordering::Relaxed);
            }
            JoinOutcome::Placed { write_error, .. } => {
                self.placements_completed.fetch_add(1, Ordering::Relaxed);
                if write_error.is_some() {
                    self.status_write_failures.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.status_writes.fetch_add(1, Ordering::Relaxed);
                }
            }
            JoinOutcome::Aborted(reason) => {
                let counter = match reason {
                    AbortReason::EntityTimeout => &self.aborts_entity_timeout,
                    AbortReason::DataTimeout => &self.aborts_data_timeout,
                    AbortReason::NoTarget => &self.aborts_no_target,
                    AbortReason::EntityLost
                    | AbortReason::Placement(PlacementError::JoinerLost) => {
                        &self.aborts_entity_lost
                    }
                    AbortReason::Placement(_) => &self.aborts_placement,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // Join lifecycle
        metric!("latejoin_joins_started_total", "Late joins picked up", "counter",
            self.joins_started.load(Ordering::Relaxed));
        metric!("latejoin_joins_ignored_total", "Join events ignored (duplicate or lobby stage)", "counter",
            self.joins_ignored.load(Ordering::Relaxed));
        metric!("latejoin_placements_total", "Joiners placed next to a peer", "counter",
            self.placements_completed.load(Ordering::Relaxed));
        metric!("latejoin_dead_restored_total", "Joiners kept dead from an earlier death on this stage", "counter",
            self.dead_restored.load(Ordering::Relaxed));
        metric!("latejoin_reconcilers_in_flight", "Joins currently being reconciled", "gauge",
            self.reconcilers_in_flight.load(Ordering::Relaxed));

        // Aborts, one series per reason
        output.push_str("# HELP latejoin_aborts_total Reconciliations that ended without placement\n");
        output.push_str("# TYPE latejoin_aborts_total counter\n");
        for (reason, counter) in [
            ("entity_timeout", &self.aborts_entity_timeout),
            ("data_timeout", &self.aborts_data_timeout),
            ("no_target", &self.aborts_no_target),
            ("entity_lost", &self.aborts_entity_lost),
            ("placement", &self.aborts_placement),
        ] {
            output.push_str(&format!(
                "latejoin_aborts_total{{reason=\"{}\"}} {}\n",
                reason,
                counter.load(Ordering::Relaxed)
            ));
        }

        // Replication
        metric!("latejoin_status_writes_total", "Status records written", "counter",
            self.status_writes.load(Ordering::Relaxed));
        metric!("latejoin_status_write_failures_total", "Status writes that failed", "counter",
            self.status_write_failures.load(Ordering::Relaxed));
        metric!("latejoin_warp_commands_total", "Replicated warp commands sent", "counter",
            self.warp_commands_sent.load(Ordering::Relaxed));

        // Performance
        metric!("latejoin_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("latejoin_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("latejoin_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("latejoin_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("latejoin_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("latejoin_uptime_seconds", "Host uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    let response = if request.starts_with("GET /metrics") {
                        let body = metrics.to_prometheus();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /health") {
                        let body = "OK";
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::status_store::StoreError;
    use crate::util::vec3::Vec3;
    use uuid::Uuid;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.joins_started.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();

        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) >= 1000);
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_record_outcomes() {
        let metrics = Metrics::new();

        metrics.record_outcome(&JoinOutcome::RestoredDead);
        metrics.record_outcome(&JoinOutcome::Placed {
            target: Uuid::new_v4(),
            arrival: Vec3::ZERO,
            dead: false,
            write_error: Some(StoreError::Offline),
        });
        metrics.record_outcome(&JoinOutcome::Aborted(AbortReason::NoTarget));
        metrics.record_outcome(&JoinOutcome::Aborted(AbortReason::Placement(
            PlacementError::JoinerLost,
        )));
        metrics.record_outcome(&JoinOutcome::Aborted(AbortReason::Placement(
            PlacementError::TargetLost,
        )));

        assert_eq!(metrics.dead_restored.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.placements_completed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.status_write_failures.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.status_writes.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.aborts_no_target.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.aborts_entity_lost.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.aborts_placement.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.joins_started.store(7, Ordering::Relaxed);
        metrics.aborts_no_target.store(2, Ordering::Relaxed);

        let output = metrics.to_prometheus();

        assert!(output.contains("latejoin_joins_started_total 7"));
        assert!(output.contains("latejoin_aborts_total{reason=\"no_target\"} 2"));
        assert!(output.contains("latejoin_aborts_total{reason=\"entity_timeout\"} 0"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
