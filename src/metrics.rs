#![forbid(unsafe_code)]

// Relay metrics — lock-free AtomicU64 counters and a Prometheus-compatible histogram.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

/// Histogram buckets: upper bound in microseconds paired with its `le` label.
/// Relay handling is a map lookup plus a channel push, so the range is sub-millisecond heavy.
const BUCKETS: [(u64, &str); 8] = [
    (50, "0.00005"),
    (100, "0.0001"),
    (250, "0.00025"),
    (500, "0.0005"),
    (1_000, "0.001"),
    (5_000, "0.005"),
    (25_000, "0.025"),
    (100_000, "0.1"),
];

/// Prometheus-compatible cumulative histogram with fixed buckets.
pub struct Histogram {
    buckets: [AtomicU64; BUCKETS.len()],
    count: AtomicU64,
    sum_us: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, duration: Duration) {
        let us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.sum_us.fetch_add(us, Relaxed);
        self.count.fetch_add(1, Relaxed);
        for (counter, (bound, _)) in self.buckets.iter().zip(BUCKETS.iter()) {
            if us <= *bound {
                counter.fetch_add(1, Relaxed);
            }
        }
    }

    fn render(&self, name: &str, help: &str, out: &mut String) {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} histogram");
        for (counter, (_, label)) in self.buckets.iter().zip(BUCKETS.iter()) {
            let _ = writeln!(out, "{name}_bucket{{le=\"{label}\"}} {}", counter.load(Relaxed));
        }
        let count = self.count.load(Relaxed);
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {count}");
        let sum_us = self.sum_us.load(Relaxed);
        let _ = writeln!(out, "{name}_sum {}.{:06}", sum_us / 1_000_000, sum_us % 1_000_000);
        let _ = writeln!(out, "{name}_count {count}");
    }
}

/// Relay-wide metrics. Cheap to clone; all clones share the same counters.
#[derive(Clone)]
pub struct ServerMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    connections_total: AtomicU64,
    frames_received_total: AtomicU64,
    frames_sent_total: AtomicU64,
    frames_dropped_total: AtomicU64,
    decode_errors_total: AtomicU64,
    rooms_created_total: AtomicU64,
    rooms_closed_total: AtomicU64,
    joins_total: AtomicU64,
    protocol_errors_total: AtomicU64,
    viewer_leaves_total: AtomicU64,

    connections_active: AtomicU64,

    message_handling: Histogram,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                connections_total: AtomicU64::new(0),
                frames_received_total: AtomicU64::new(0),
                frames_sent_total: AtomicU64::new(0),
                frames_dropped_total: AtomicU64::new(0),
                decode_errors_total: AtomicU64::new(0),
                rooms_created_total: AtomicU64::new(0),
                rooms_closed_total: AtomicU64::new(0),
                joins_total: AtomicU64::new(0),
                protocol_errors_total: AtomicU64::new(0),
                viewer_leaves_total: AtomicU64::new(0),
                connections_active: AtomicU64::new(0),
                message_handling: Histogram::new(),
            }),
        }
    }

    // --- Counter increments ---

    pub fn inc_connections_total(&self) {
        self.inner.connections_total.fetch_add(1, Relaxed);
    }

    pub fn inc_frames_received(&self) {
        self.inner.frames_received_total.fetch_add(1, Relaxed);
    }

    pub fn inc_frames_sent(&self) {
        self.inner.frames_sent_total.fetch_add(1, Relaxed);
    }

    /// A frame addressed to a closed or saturated connection was discarded
    pub fn inc_frames_dropped(&self) {
        self.inner.frames_dropped_total.fetch_add(1, Relaxed);
    }

    pub fn inc_decode_errors(&self) {
        self.inner.decode_errors_total.fetch_add(1, Relaxed);
    }

    pub fn inc_rooms_created(&self) {
        self.inner.rooms_created_total.fetch_add(1, Relaxed);
    }

    pub fn inc_rooms_closed(&self) {
        self.inner.rooms_closed_total.fetch_add(1, Relaxed);
    }

    pub fn inc_joins(&self) {
        self.inner.joins_total.fetch_add(1, Relaxed);
    }

    pub fn inc_protocol_errors(&self) {
        self.inner.protocol_errors_total.fetch_add(1, Relaxed);
    }

    pub fn inc_viewer_leaves(&self) {
        self.inner.viewer_leaves_total.fetch_add(1, Relaxed);
    }

    // --- Gauge ---

    /// Increments connections_active and returns a guard that decrements it on drop.
    pub fn connection_active_guard(&self) -> ConnectionGuard {
        self.inner.connections_active.fetch_add(1, Relaxed);
        ConnectionGuard { inner: self.inner.clone() }
    }

    // --- Histogram ---

    pub fn observe_message_handling(&self, duration: Duration) {
        self.inner.message_handling.observe(duration);
    }

    /// Snapshot of a counter by its rendered name, for tests and health output.
    pub fn counter(&self, name: &str) -> Option<u64> {
        let i = &self.inner;
        let value = match name {
            "connections_total" => &i.connections_total,
            "frames_received_total" => &i.frames_received_total,
            "frames_sent_total" => &i.frames_sent_total,
            "frames_dropped_total" => &i.frames_dropped_total,
            "decode_errors_total" => &i.decode_errors_total,
            "rooms_created_total" => &i.rooms_created_total,
            "rooms_closed_total" => &i.rooms_closed_total,
            "joins_total" => &i.joins_total,
            "protocol_errors_total" => &i.protocol_errors_total,
            "viewer_leaves_total" => &i.viewer_leaves_total,
            "connections_active" => &i.connections_active,
            _ => return None,
        };
        Some(value.load(Relaxed))
    }

    // --- Prometheus rendering ---

    /// Renders all metrics in Prometheus text exposition format.
    /// Room and session gauges are sampled from the relay by the caller.
    pub fn render_prometheus(&self, rooms_active: usize, sessions_active: usize) -> String {
        let mut out = String::with_capacity(2048);
        let i = &self.inner;

        let counters = [
            ("connections_total", "Total WebSocket connections accepted", &i.connections_total),
            ("frames_received_total", "Total text frames received from clients", &i.frames_received_total),
            ("frames_sent_total", "Total frames written to clients", &i.frames_sent_total),
            ("frames_dropped_total", "Frames discarded because the recipient was gone or saturated", &i.frames_dropped_total),
            ("decode_errors_total", "Inbound frames that failed to decode", &i.decode_errors_total),
            ("rooms_created_total", "Total rooms created", &i.rooms_created_total),
            ("rooms_closed_total", "Total rooms closed by broadcaster disconnect", &i.rooms_closed_total),
            ("joins_total", "Total successful viewer joins", &i.joins_total),
            ("protocol_errors_total", "Error replies sent to clients", &i.protocol_errors_total),
            ("viewer_leaves_total", "Total viewers that left a live room", &i.viewer_leaves_total),
        ];
        for (name, help, value) in counters {
            render_metric(&mut out, &format!("relay_{name}"), help, "counter", value.load(Relaxed));
        }

        render_metric(&mut out, "relay_connections_active", "Currently open WebSocket connections", "gauge", i.connections_active.load(Relaxed));
        render_metric(&mut out, "relay_rooms_active", "Currently active rooms", "gauge", rooms_active as u64);
        render_metric(&mut out, "relay_sessions_active", "Connections bound to a room", "gauge", sessions_active as u64);

        i.message_handling.render(
            "relay_message_handling_seconds",
            "Inbound message handling latency in seconds",
            &mut out,
        );

        out
    }
}

/// Decrements `connections_active` on drop, including on handler panic.
pub struct ConnectionGuard {
    inner: Arc<Inner>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.inner.connections_active.fetch_sub(1, Relaxed);
    }
}

fn render_metric(out: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
    let _ = writeln!(out, "{name} {value}");
}
