use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: allocation attempts. Labels: status.
pub const ALLOCATIONS_TOTAL: &str = "resledger_allocations_total";

/// Counter: reschedule attempts. Labels: status.
pub const RESCHEDULES_TOTAL: &str = "resledger_reschedules_total";

/// Counter: conflict checks evaluated.
pub const CONFLICT_CHECKS_TOTAL: &str = "resledger_conflict_checks_total";

/// Histogram: utilization report latency in seconds.
pub const REPORT_DURATION_SECONDS: &str = "resledger_report_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "resledger_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "resledger_wal_flush_batch_size";

/// Map a mutation outcome to a short label for metrics.
pub fn outcome_label(result: &Result<(), EngineError>) -> &'static str {
    match result {
        Ok(()) => "approved",
        Err(EngineError::Conflict(_)) => "conflict",
        Err(EngineError::DuplicateAllocation { .. }) => "duplicate",
        Err(EngineError::NotFound(_)) => "not_found",
        Err(EngineError::InvalidInterval { .. }) => "invalid_interval",
        Err(EngineError::LimitExceeded(_)) => "limit_exceeded",
        Err(EngineError::AlreadyExists(_)) => "already_exists",
        Err(EngineError::WalError(_)) => "wal_error",
    }
}
