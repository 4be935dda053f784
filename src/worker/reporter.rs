//! Periodic active-worker count reporting.
//!
//! PUTs `{"current": <count>}` to the configured aggregator endpoint on
//! a fixed interval. A failed report is logged and dropped; the next
//! tick retries naturally.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::worker::registry::WorkerRegistry;
use crate::{AppError, Result};

/// Spawn the background count-report loop. Reports at the configured
/// interval until the `CancellationToken` fires. Does nothing when no
/// report URL is configured.
#[must_use]
pub fn spawn_count_reporter(
    registry: Arc<WorkerRegistry>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = registry.config().report_interval();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("count reporter shutting down");
                    break;
                }
                () = tokio::time::sleep(interval) => {}
            }
            registry.report_once().await;
        }
    })
}

/// PUT the current worker count to the aggregator.
///
/// # Errors
///
/// Returns `AppError::Report` on transport failure or a non-success
/// status.
pub async fn put_count(client: &reqwest::Client, url: &str, current: usize) -> Result<()> {
    let response = client
        .put(url)
        .json(&serde_json::json!({ "current": current }))
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(AppError::Report(format!(
            "aggregator returned {}",
            response.status()
        )));
    }
    Ok(())
}
