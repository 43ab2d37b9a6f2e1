//! Hub self-health, reported on /system/health.

use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct HubHealth {
    pub uptime_seconds: u64,
    pub machines_tracked: u32,
    pub snapshots_stored: u64,
    pub poller_running: bool,
    pub cleanup_running: bool,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct StatusTracker {
    start_time: Instant,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn snapshot(
        &self,
        machines_tracked: usize,
        snapshots_stored: usize,
        poller_running: bool,
        cleanup_running: bool,
    ) -> HubHealth {
        HubHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            machines_tracked: machines_tracked as u32,
            snapshots_stored: snapshots_stored as u64,
            poller_running,
            cleanup_running,
            memory_usage_mb: memory_usage_mb(),
        }
    }
}

fn memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb) = line
                        .split_whitespace()
                        .nth(1)
                        .and_then(|v| v.parse::<u64>().ok())
                    {
                        return kb as f32 / 1024.0; // KB -> MB
                    }
                }
            }
        }
    }
    0.0
}
