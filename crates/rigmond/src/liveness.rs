//! Liveness sweeping for silent rigs.
//!
//! Transport-level disconnect notification is not guaranteed (network
//! partition, abrupt power loss), so a background task periodically asks
//! the registry to mark rigs that stopped reporting as offline. The
//! sweep itself runs inside the registry actor; this task only supplies
//! the cadence.

use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::RegistryHandle;

/// Default sweep cadence (every 5 minutes).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Default silence window before a rig is considered gone (5 minutes).
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// Spawns the liveness sweep task.
///
/// A tick that finds the registry gone ends the task; any failure
/// inside a single sweep is the actor's to log and never stops future
/// ticks.
pub fn spawn_liveness_task(
    registry: RegistryHandle,
    sweep_interval: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(sweep_interval);
        // The first interval tick fires immediately; a sweep over a
        // fresh registry is harmless, so no special-casing.

        info!(
            interval_secs = sweep_interval.as_secs(),
            "Liveness monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Liveness monitor shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    if !registry.is_connected() {
                        debug!("Liveness monitor stopping: registry closed");
                        break;
                    }
                    registry.sweep_stale().await;
                    debug!("Triggered stale rig sweep");
                }
            }
        }
    })
}
