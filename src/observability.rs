use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests. Labels: method, route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "fleetbook_http_requests_total";

/// Histogram: request latency in seconds. Labels: method, route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "fleetbook_http_request_duration_seconds";

/// Counter: requests turned away by the in-flight limit.
pub const HTTP_REQUESTS_REJECTED_TOTAL: &str = "fleetbook_http_requests_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: requests currently being served.
pub const HTTP_IN_FLIGHT: &str = "fleetbook_http_in_flight";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fleetbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "fleetbook_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: reservations created. Labels: status.
pub const RESERVATIONS_CREATED_TOTAL: &str = "fleetbook_reservations_created_total";

/// Counter: writes refused because an approved reservation overlaps.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "fleetbook_reservation_conflicts_total";

/// Counter: failed logins. Labels: reason.
pub const LOGIN_FAILURES_TOTAL: &str = "fleetbook_login_failures_total";

/// Counter: bearer tokens that failed verification. Labels: reason.
pub const SESSIONS_REJECTED_TOTAL: &str = "fleetbook_sessions_rejected_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
