use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Booking flow ────────────────────────────────────────────────

/// Counter: bookings created. Labels: origin.
pub const RESERVATIONS_TOTAL: &str = "slotkeeper_reservations_total";

/// Counter: writes refused because the target slot was occupied.
pub const SLOT_CONFLICTS_TOTAL: &str = "slotkeeper_slot_conflicts_total";

/// Counter: coordinator requests refused by a booking rule. Labels: reason.
pub const BOOKING_REJECTIONS_TOTAL: &str = "slotkeeper_booking_rejections_total";

/// Counter: bookings created from fixed bookings.
pub const OCCURRENCES_MATERIALIZED_TOTAL: &str = "slotkeeper_occurrences_materialized_total";

/// Counter: attendance responses. Labels: outcome.
pub const CONFIRMATIONS_TOTAL: &str = "slotkeeper_confirmations_total";

/// Counter: attendance responses carrying the wrong token.
pub const INVALID_TOKENS_TOTAL: &str = "slotkeeper_invalid_tokens_total";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotkeeper_wal_flush_duration_seconds";

/// Histogram: records per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotkeeper_wal_flush_batch_size";

/// Counter: completed journal compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotkeeper_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
