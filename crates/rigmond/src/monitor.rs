//! Self-monitoring for the rigmond daemon process.
//!
//! Periodically samples the daemon's own memory and CPU usage via
//! `sysinfo` and logs it, warning when a threshold is crossed. This
//! watches the daemon itself, not the rigs.

use std::process;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Memory usage warning threshold in MB.
pub const HIGH_MEMORY_THRESHOLD_MB: u64 = 200;

/// CPU usage warning threshold (percentage).
pub const HIGH_CPU_THRESHOLD_PERCENT: f32 = 80.0;

/// How often to sample.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// One resource usage sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceUsage {
    /// Resident memory in megabytes
    pub memory_mb: u64,

    /// CPU usage as a percentage (can exceed 100 on multicore)
    pub cpu_percent: f32,
}

impl ResourceUsage {
    /// Returns true if either metric is above its warning threshold.
    pub fn is_high(&self) -> bool {
        self.memory_mb > HIGH_MEMORY_THRESHOLD_MB || self.cpu_percent > HIGH_CPU_THRESHOLD_PERCENT
    }
}

/// Samples resource usage for the current process.
///
/// `sysinfo` needs a previous refresh as the CPU baseline, so the first
/// sample always reports 0% CPU.
pub struct ResourceSampler {
    system: System,
    pid: Pid,
}

impl ResourceSampler {
    /// Creates a sampler for the current process.
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(process::id()),
        }
    }

    /// Refreshes system info and returns the current sample.
    pub fn sample(&mut self) -> ResourceUsage {
        // Full refresh: per-process refresh alone does not compute CPU%.
        self.system.refresh_all();

        let (memory_bytes, cpu_percent) = self
            .system
            .process(self.pid)
            .map(|p| (p.memory(), p.cpu_usage()))
            .unwrap_or((0, 0.0));

        ResourceUsage {
            memory_mb: memory_bytes / 1024 / 1024,
            cpu_percent,
        }
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the resource monitoring task.
pub fn spawn_monitor_task(cancel_token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sampler = ResourceSampler::new();
        let mut tick = interval(SAMPLE_INTERVAL);

        // Establish the CPU baseline.
        let _ = sampler.sample();

        info!(
            interval_secs = SAMPLE_INTERVAL.as_secs(),
            "Resource monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Resource monitor shutting down");
                    break;
                }

                _ = tick.tick() => {
                    let usage = sampler.sample();
                    if usage.is_high() {
                        warn!(
                            memory_mb = usage.memory_mb,
                            cpu_percent = format!("{:.1}", usage.cpu_percent),
                            "Daemon resource usage above threshold"
                        );
                    } else {
                        debug!(
                            memory_mb = usage.memory_mb,
                            cpu_percent = format!("{:.1}", usage.cpu_percent),
                            "Daemon resource usage"
                        );
                    }
                }
            }
        }
    })
}
