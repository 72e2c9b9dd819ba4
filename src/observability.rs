use std::net::SocketAddr;
use std::time::Instant;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations executed. Labels: op, outcome.
pub const OPERATIONS_TOTAL: &str = "salon_operations_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "salon_operation_duration_seconds";

/// Counter: approvals/bookings refused because the slot was taken.
pub const SLOT_CONFLICTS_TOTAL: &str = "salon_slot_conflicts_total";

// ── Ledger ──────────────────────────────────────────────────────

/// Counter: commission rows recomputed.
pub const COMMISSION_RECOMPUTES_TOTAL: &str = "salon_commission_recomputes_total";

/// Gauge: ledger keys waiting for a compensating recompute.
pub const STALE_LEDGERS: &str = "salon_stale_ledgers";

// ── USE metrics (journal) ───────────────────────────────────────

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "salon_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "salon_journal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus metrics exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Count and time one engine operation.
pub fn record_operation<T>(op: &'static str, started: Instant, result: &Result<T, EngineError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
    if let Err(EngineError::SlotConflict(_)) = result {
        metrics::counter!(SLOT_CONFLICTS_TOTAL, "op" => op).increment(1);
    }
}
