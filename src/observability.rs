use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "berth_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "berth_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: allocation rows created (one per booked night).
pub const ALLOCATIONS_CREATED_TOTAL: &str = "berth_allocations_created_total";

/// Counter: rejected bookings. Labels: kind (slot, gender, constraint).
pub const CONFLICTS_TOTAL: &str = "berth_conflicts_total";

/// Counter: allocations cancelled by a forced block.
pub const OVERRIDES_TOTAL: &str = "berth_overrides_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "berth_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "berth_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "berth_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "berth_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "berth_wal_flush_batch_size";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertHouse(_) => "insert_staff_house",
        Command::InsertRoom(_) => "insert_room",
        Command::InsertOccupant(_) => "insert_occupant",
        Command::InsertTravelRequest(_) => "insert_travel_request",
        Command::UpdateRoomStatus { .. } => "update_room_status",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::DeleteBlock { .. } => "delete_block",
        Command::SelectBookings(_) => "select_bookings",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectTravelLog { .. } => "select_travel_log",
    }
}
