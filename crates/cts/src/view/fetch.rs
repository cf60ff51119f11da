//! The background long-poll loop that keeps one [`super::registry::ViewHandle`]
//! current.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::backoff::full_jitter;
use crate::catalog::{CatalogClient, Dependency};
use crate::error::Classified;

use super::registry::ViewHandle;

const RETRY_BASE: Duration = Duration::from_millis(250);
const RETRY_CAP: Duration = Duration::from_secs(60);
const PERMANENT_FAILURE_PAUSE: Duration = Duration::from_secs(30);

pub(crate) fn spawn(
    client: Arc<dyn CatalogClient>,
    handle: Arc<ViewHandle>,
    notify_tx: broadcast::Sender<Dependency>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(client, handle, notify_tx))
}

async fn run(
    client: Arc<dyn CatalogClient>,
    handle: Arc<ViewHandle>,
    notify_tx: broadcast::Sender<Dependency>,
) {
    let label = handle.dependency.label();
    let mut attempt: u32 = 0;

    loop {
        let wait_index = handle.current_index();

        let outcome = tokio::select! {
            _ = handle.cancel.cancelled() => return,
            result = client.blocking_read(&handle.dependency, wait_index) => result,
        };

        match outcome {
            Ok(fetched) => {
                attempt = 0;
                if wait_index != 0 && fetched.index <= wait_index {
                    // Spurious wakeup: the catalog returned without a
                    // real change. Re-poll without notifying.
                    continue;
                }

                if let Some(delay) = handle.dependency.propagation_delay() {
                    tokio::select! {
                        _ = handle.cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }

                handle.store(fetched.result, fetched.index);
                let _ = notify_tx.send(handle.dependency.clone());
            }
            Err(e) if e.is_retryable() => {
                attempt += 1;
                let delay = full_jitter(RETRY_BASE, RETRY_CAP, attempt);
                tracing::warn!(
                    dependency = %label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "catalog fetch failed, retrying"
                );
                tokio::select! {
                    _ = handle.cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                tracing::error!(dependency = %label, error = %e, "catalog fetch permanently failed");
                handle.mark_failed();
                let _ = notify_tx.send(handle.dependency.clone());
                tokio::select! {
                    _ = handle.cancel.cancelled() => return,
                    _ = tokio::time::sleep(PERMANENT_FAILURE_PAUSE) => {}
                }
            }
        }
    }
}
