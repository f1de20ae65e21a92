use std::net::SocketAddr;

// ── Queue ───────────────────────────────────────────────────────

/// Counter: queue operations. Labels: op, status (`ok` or error kind).
pub const QUEUE_OPS_TOTAL: &str = "vetdesk_queue_ops_total";

/// Gauge: waiting entries. Labels: clinic.
pub const QUEUE_WAITING: &str = "vetdesk_queue_waiting";

// ── Availability ────────────────────────────────────────────────

/// Histogram: availability computation latency in seconds.
pub const AVAILABILITY_DURATION_SECONDS: &str = "vetdesk_availability_duration_seconds";

/// Counter: availability computations. Labels: outcome (open, closed, fully_booked).
pub const AVAILABILITY_TOTAL: &str = "vetdesk_availability_total";

// ── Visits ──────────────────────────────────────────────────────

/// Counter: walk-ins called while the vet had a scheduled appointment.
pub const VISIT_OVERLAP_WARNINGS_TOTAL: &str = "vetdesk_visit_overlap_warnings_total";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "vetdesk_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "vetdesk_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}
