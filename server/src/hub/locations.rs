//! In-memory latest-location table, one live record per driver.
//!
//! Last-write-wins: whatever the hub processes most recently for a driver id
//! replaces what was there. Records leave the table in exactly two ways —
//! the owning driver disconnects, or the staleness reaper evicts them.

use chrono::Duration;
use dashmap::DashMap;

use crate::protocol::{now_millis, DriverLocation};

#[derive(Default)]
pub struct LocationTable {
    records: DashMap<String, DriverLocation>,
}

impl LocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record for its driver id.
    pub fn upsert(&self, record: DriverLocation) {
        self.records.insert(record.driver_id.clone(), record);
    }

    /// Upsert a batch in one pass. Returns how many records landed.
    pub fn upsert_many<I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = DriverLocation>,
    {
        let mut count = 0;
        for record in records {
            self.upsert(record);
            count += 1;
        }
        count
    }

    pub fn get(&self, driver_id: &str) -> Option<DriverLocation> {
        self.records.get(driver_id).map(|r| r.clone())
    }

    pub fn remove(&self, driver_id: &str) -> Option<DriverLocation> {
        self.records.remove(driver_id).map(|(_, record)| record)
    }

    /// Current view of every live record, for the snapshot endpoint and the
    /// bulk-update aggregate.
    pub fn snapshot(&self) -> Vec<DriverLocation> {
        self.records.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn driver_count(&self) -> usize {
        self.records.len()
    }

    /// Evict every record older than `max_age`. Eviction is silent — absence
    /// from the snapshot is itself the staleness signal. Returns the evicted
    /// count for the reaper's log line.
    pub fn reap_stale(&self, max_age: Duration) -> usize {
        let cutoff = now_millis() - max_age.num_milliseconds();
        let before = self.records.len();
        self.records.retain(|_, record| record.timestamp >= cutoff);
        before - self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(driver_id: &str, latitude: f64, age: Duration) -> DriverLocation {
        DriverLocation {
            driver_id: driver_id.into(),
            latitude,
            longitude: 79.86,
            timestamp: now_millis() - age.num_milliseconds(),
            ride_id: None,
            daily_route_id: None,
        }
    }

    #[test]
    fn upsert_is_last_write_wins() {
        let table = LocationTable::new();
        table.upsert(record("D1", 6.90, Duration::zero()));
        table.upsert(record("D1", 6.95, Duration::zero()));

        let live = table.get("D1").unwrap();
        assert_eq!(live.latitude, 6.95);
        assert_eq!(table.driver_count(), 1);
    }

    #[test]
    fn reap_evicts_past_threshold_only() {
        let table = LocationTable::new();
        table.upsert(record("fresh", 6.9, Duration::minutes(4)));
        table.upsert(record("stale", 6.9, Duration::minutes(6)));

        let evicted = table.reap_stale(Duration::minutes(5));

        assert_eq!(evicted, 1);
        assert!(table.get("fresh").is_some(), "4-minute record must survive");
        assert!(table.get("stale").is_none(), "6-minute record must be gone");
    }

    #[test]
    fn remove_returns_the_evicted_record() {
        let table = LocationTable::new();
        table.upsert(record("D1", 6.9, Duration::zero()));

        let removed = table.remove("D1").unwrap();
        assert_eq!(removed.driver_id, "D1");
        assert!(table.get("D1").is_none());
        assert!(table.remove("D1").is_none());
    }

    #[test]
    fn snapshot_reflects_bulk_upsert() {
        let table = LocationTable::new();
        let count = table.upsert_many(vec![
            record("D1", 6.9, Duration::zero()),
            record("D2", 7.0, Duration::zero()),
        ]);
        assert_eq!(count, 2);
        assert_eq!(table.snapshot().len(), 2);
    }
}
