//! Polling loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Orchestrator;

/// Run a cycle over every monitored requirement, sleep `poll_interval`,
/// repeat until `shutdown` fires. The interval is re-read after each cycle
/// so configuration changes apply from the next one.
///
/// On shutdown the requirement being checked finishes; the rest of the cycle
/// is skipped. Returns the number of cycles run.
pub async fn poll(orchestrator: Arc<Orchestrator>, shutdown: CancellationToken) -> u64 {
    let mut cycles = 0;
    while !shutdown.is_cancelled() {
        match orchestrator.run_monitored(&shutdown).await {
            Ok(results) => {
                cycles += 1;
                info!(cycle = cycles, requirements = results.len(), "poll cycle finished");
            }
            Err(e) => error!(error = %e, "could not list monitored requirements"),
        }

        let interval = orchestrator.config().poll_interval;
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!(cycles, "scheduler stopped");
    cycles
}
