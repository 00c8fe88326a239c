use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::wire::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands handled. Labels: op, status.
pub const COMMANDS_TOTAL: &str = "examslot_commands_total";

/// Histogram: command latency in seconds. Labels: op.
pub const COMMAND_DURATION_SECONDS: &str = "examslot_command_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "examslot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "examslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "examslot_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "examslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "examslot_wal_flush_batch_size";

// ── Ledger ──────────────────────────────────────────────────────

/// Counter: hour buckets materialized.
pub const SLOTS_CREATED_TOTAL: &str = "examslot_slots_created_total";

/// Histogram: time spent acquiring bucket row locks, in seconds.
pub const LEDGER_LOCK_WAIT_SECONDS: &str = "examslot_ledger_lock_wait_seconds";

/// Counter: ledger transactions applied with at least one delta.
pub const LEDGER_COMMITS_TOTAL: &str = "examslot_ledger_commits_total";

/// Counter: requests refused because a bucket lacked seats.
pub const CAPACITY_REJECTIONS_TOTAL: &str = "examslot_capacity_rejections_total";

/// Counter: admin status changes. Labels: to.
pub const STATUS_CHANGES_TOTAL: &str = "examslot_status_changes_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Ping => "ping",
        Command::CreateAccount { .. } => "create_account",
        Command::GetAccount { .. } => "get_account",
        Command::CreateSchedule { .. } => "create_schedule",
        Command::UpdateSchedule { .. } => "update_schedule",
        Command::CancelSchedule { .. } => "cancel_schedule",
        Command::ListSchedules { .. } => "list_schedules",
        Command::AdminListSchedules { .. } => "admin_list_schedules",
        Command::AdminUpdateSchedule { .. } => "admin_update_schedule",
        Command::AdminChangeStatus { .. } => "admin_change_status",
        Command::GetSlot { .. } => "get_slot",
        Command::ListSlots { .. } => "list_slots",
    }
}
