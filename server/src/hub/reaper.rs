//! Background staleness reaper for driver location records.
//!
//! Spawns a tokio task that periodically evicts records whose timestamp has
//! aged past the configured threshold. Eviction is silent — no broadcast —
//! since absence from the snapshot is itself the signal.

use std::sync::Arc;

use crate::hub::locations::LocationTable;

/// Spawn a background task that periodically reaps stale location records.
///
/// Runs `reap_stale` every `interval` (default 60 s), evicting records older
/// than `stale_after` (default 5 min). Logs the eviction count each cycle.
pub fn spawn_stale_location_reaper(
    locations: Arc<LocationTable>,
    stale_after: chrono::Duration,
    interval: std::time::Duration,
) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let evicted = locations.reap_stale(stale_after);
            if evicted > 0 {
                tracing::info!("location reaper: evicted {} stale records", evicted);
            } else {
                tracing::debug!("location reaper: nothing stale");
            }
        }
    });
}
