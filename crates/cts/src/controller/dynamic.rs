//! Per-dynamic-task background loop: watch the view registry's
//! broadcast channel, coalesce changes behind the task's buffer
//! period, then dispatch one apply.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::catalog::Dependency;
use crate::driver::TaskDriver;

use super::buffer::BufferPeriod;

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Runs until `cancel` fires. A lagged receiver (the subscriber fell
/// behind the broadcast channel's buffer) is treated the same as a
/// relevant change: it's cheaper to re-render spuriously than to miss
/// an update.
pub async fn run(
    driver: Arc<TaskDriver>,
    mut changes: broadcast::Receiver<Dependency>,
    cancel: CancellationToken,
) {
    let mut buffer = BufferPeriod::new(driver.task_config().buffer_period);
    let mut deadline: Option<Instant> = None;

    let initial = driver.render_template();
    if initial.ready {
        deadline = Some(buffer.arm(Instant::now()));
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            received = changes.recv() => {
                match received {
                    Ok(dependency) if driver.dependencies().any(|d| *d == dependency) => {
                        let outcome = driver.render_template();
                        if outcome.ready && outcome.changed {
                            deadline = Some(buffer.arm(Instant::now()));
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let outcome = driver.render_template();
                        if outcome.ready && outcome.changed {
                            deadline = Some(buffer.arm(Instant::now()));
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
            _ = wait_for_deadline(deadline) => {
                buffer.reset();
                deadline = None;
                if let Err(e) = driver.apply_task().await {
                    tracing::warn!(task = driver.task_name(), error = %e, "dynamic apply failed");
                }
            }
        }
    }
}
