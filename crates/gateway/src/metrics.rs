use std::sync::{
    atomic::{AtomicI64, AtomicU64, Ordering},
    Arc, OnceLock,
};

/// Process-wide gateway counters, rendered in the Prometheus text
/// exposition format by `render_prometheus`.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    sessions_registered_total: AtomicU64,
    sessions_unregistered_total: AtomicU64,
    frames_broadcast_total: AtomicU64,
    frames_rejected_total: AtomicU64,
    frames_rate_limited_total: AtomicU64,
    sessions_dropped_backpressure_total: AtomicU64,
    sessions_reclaimed_deadline_total: AtomicU64,
    active_sessions: AtomicI64,
}

static GLOBAL_METRICS: OnceLock<Arc<GatewayMetrics>> = OnceLock::new();

pub fn set_global_metrics(metrics: Arc<GatewayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<GatewayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_session_registered() {
    if let Some(metrics) = global_metrics() {
        metrics.sessions_registered_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn record_session_unregistered() {
    if let Some(metrics) = global_metrics() {
        metrics.sessions_unregistered_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn record_broadcast() {
    if let Some(metrics) = global_metrics() {
        metrics.frames_broadcast_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn record_invalid_frame() {
    if let Some(metrics) = global_metrics() {
        metrics.frames_rejected_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn record_rate_limited() {
    if let Some(metrics) = global_metrics() {
        metrics.frames_rate_limited_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn record_backpressure_drop() {
    if let Some(metrics) = global_metrics() {
        metrics.sessions_dropped_backpressure_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn record_deadline_reclaim() {
    if let Some(metrics) = global_metrics() {
        metrics.sessions_reclaimed_deadline_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn set_active_sessions(count: usize) {
    if let Some(metrics) = global_metrics() {
        metrics.active_sessions.store(count as i64, Ordering::SeqCst);
    }
}

pub fn render_global() -> String {
    global_metrics().map(|metrics| metrics.render_prometheus()).unwrap_or_default()
}

impl GatewayMetrics {
    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        append_counter(
            &mut output,
            "gateway_sessions_registered_total",
            "Total sessions registered with the hub.",
            self.sessions_registered_total.load(Ordering::SeqCst),
        );
        append_counter(
            &mut output,
            "gateway_sessions_unregistered_total",
            "Total sessions removed from the hub.",
            self.sessions_unregistered_total.load(Ordering::SeqCst),
        );
        append_counter(
            &mut output,
            "gateway_frames_broadcast_total",
            "Total frames admitted for fan-out.",
            self.frames_broadcast_total.load(Ordering::SeqCst),
        );
        append_counter(
            &mut output,
            "gateway_frames_rejected_total",
            "Total frames dropped by validation.",
            self.frames_rejected_total.load(Ordering::SeqCst),
        );
        append_counter(
            &mut output,
            "gateway_frames_rate_limited_total",
            "Total inbound frames suppressed by per-session rate limiting.",
            self.frames_rate_limited_total.load(Ordering::SeqCst),
        );
        append_counter(
            &mut output,
            "gateway_sessions_dropped_backpressure_total",
            "Total sessions disconnected for a full outbound buffer.",
            self.sessions_dropped_backpressure_total.load(Ordering::SeqCst),
        );
        append_counter(
            &mut output,
            "gateway_sessions_reclaimed_deadline_total",
            "Total sessions reclaimed after read-deadline expiry.",
            self.sessions_reclaimed_deadline_total.load(Ordering::SeqCst),
        );

        output.push_str("# HELP gateway_active_sessions Current registered session count.\n");
        output.push_str("# TYPE gateway_active_sessions gauge\n");
        output.push_str(&format!(
            "gateway_active_sessions {}\n",
            self.active_sessions.load(Ordering::SeqCst)
        ));

        output
    }
}

fn append_counter(output: &mut String, name: &str, help: &str, value: u64) {
    output.push_str(&format!("# HELP {name} {help}\n"));
    output.push_str(&format!("# TYPE {name} counter\n"));
    output.push_str(&format!("{name} {value}\n"));
}
