//! Device hotplug watcher.
//!
//! Polls the backend's device list and requests a reload when the set of
//! attached devices changes. The scanner set is only ever rebuilt as a
//! whole, so the watcher exits after its first reload request.

use std::sync::Arc;
use std::time::Duration;

use airscan_core::metrics as m;
use airscan_escl::{ControlHandle, DeviceBackend};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Sorted device names, or `None` when enumeration failed.
pub fn device_snapshot(backend: &dyn DeviceBackend, local_only: bool) -> Option<Vec<String>> {
    match backend.list_devices(local_only) {
        Ok(devices) => {
            let mut names: Vec<String> = devices.into_iter().map(|d| d.name).collect();
            names.sort();
            Some(names)
        }
        Err(e) => {
            tracing::debug!(error = %e, "hotplug enumeration failed");
            None
        }
    }
}

/// Watches for topology changes until `cancel` fires or a change is seen.
///
/// `baseline` is the device set the current registry was built from.
/// Failed polls are skipped rather than treated as a change.
pub async fn watch(
    backend: Arc<dyn DeviceBackend>,
    local_only: bool,
    baseline: Option<Vec<String>>,
    poll_interval: Duration,
    control: ControlHandle,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = cancel.cancelled() => {
                tracing::debug!("hotplug watcher shutting down");
                return;
            }
        }

        let backend = Arc::clone(&backend);
        let current =
            match tokio::task::spawn_blocking(move || device_snapshot(backend.as_ref(), local_only))
                .await
            {
                Ok(Some(current)) => current,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "hotplug poll task failed");
                    continue;
                }
            };

        let changed = match &baseline {
            Some(baseline) => *baseline != current,
            None => true,
        };
        if changed {
            tracing::info!(
                previous = ?baseline,
                current = ?current,
                "scanner topology changed, requesting reload"
            );
            metrics::counter!(m::DAEMON_RELOADS_TOTAL, m::LABEL_REASON => "hotplug").increment(1);
            control.request_reload();
            return;
        }
    }
}
