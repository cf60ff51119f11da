//! Per-scheduled-task background loop: sleep until the next cron fire
//! time and apply unconditionally, regardless of whether any watched
//! view changed since the last tick.

use std::sync::Arc;

use chrono::Utc;
use croner::Cron;
use tokio_util::sync::CancellationToken;

use crate::driver::TaskDriver;

use super::scheduler::ControllerError;

/// Recomputes the next occurrence from the current wall clock on every
/// iteration rather than queuing ticks, so any ticks missed while a
/// prior apply was still in flight collapse into a single pending one.
pub async fn run(
    driver: Arc<TaskDriver>,
    cron_expr: String,
    cancel: CancellationToken,
) -> Result<(), ControllerError> {
    let schedule = cron_expr
        .parse::<Cron>()
        .map_err(|e| ControllerError::InvalidSchedule(format!("{cron_expr}: {e}")))?;

    loop {
        let now = Utc::now();
        let next = schedule
            .find_next_occurrence(&now, false)
            .map_err(|e| ControllerError::InvalidSchedule(e.to_string()))?;
        let delay = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }

        let outcome = driver.render_template();
        if !outcome.ready {
            tracing::debug!(task = driver.task_name(), "scheduled fire skipped: views not ready yet");
            continue;
        }
        if let Err(e) = driver.apply_task().await {
            tracing::warn!(task = driver.task_name(), error = %e, "scheduled apply failed");
        }
    }
}
