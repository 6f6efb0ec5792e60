use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::diagnostic::{DiagnosticEngine, SweepReport};

pub async fn cleanup_expired_sessions(
    engine: Arc<DiagnosticEngine>,
) -> Result<SweepReport, super::WorkerError> {
    let start = Instant::now();
    debug!("Starting session cleanup cycle");

    let report = engine.sweep_idle()?;

    info!(
        examined = report.examined,
        evicted = report.evicted,
        skipped_locked = report.skipped_locked,
        duration_secs = format!("{:.3}", start.elapsed().as_secs_f64()),
        "Session cleanup completed"
    );

    Ok(report)
}
