use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── Queries ──────────────────────────────────────────────────────

/// Counter. Labels: command, status.
pub const QUERIES_TOTAL: &str = "lendit_queries_total";

/// Histogram, seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "lendit_query_duration_seconds";

// ── Connections ──────────────────────────────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "lendit_connections_active";
pub const CONNECTIONS_TOTAL: &str = "lendit_connections_total";

/// Counter: refused because the connection limit was reached.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "lendit_connections_rejected_total";

// ── WAL ──────────────────────────────────────────────────────────

/// Histogram: group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "lendit_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "lendit_wal_flush_batch_size";

pub const WAL_COMPACTIONS_TOTAL: &str = "lendit_wal_compactions_total";

/// Serve Prometheus metrics on `port`. Does nothing when no port is given.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metric label per statement kind.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUser { .. } => "insert_user",
        Command::UpdateUser { .. } => "update_user",
        Command::SelectUsers { .. } => "select_users",
        Command::InsertItem { .. } => "insert_item",
        Command::UpdateItem { .. } => "update_item",
        Command::SelectItem { .. } => "select_item",
        Command::SelectOwnerItems { .. } => "select_owner_items",
        Command::SearchItems { .. } => "search_items",
        Command::InsertComment { .. } => "insert_comment",
        Command::InsertBooking { .. } => "insert_booking",
        Command::DecideBooking { .. } => "decide_booking",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::InsertRequest { .. } => "insert_request",
        Command::SelectRequest { .. } => "select_request",
        Command::SelectOwnRequests { .. } => "select_own_requests",
        Command::SelectOtherRequests { .. } => "select_other_requests",
    }
}
