//! Validation and deduplication of flattened feed records.
//!
//! Everything here is deterministic and free of I/O. Validation runs before
//! deduplication, so an invalid record can never inflate the duplicate
//! counters; a duplicate is dropped even when its payload differs from the
//! first-seen record, and any last-write resolution happens at the storage
//! layer.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::records::{TripUpdateRecord, VehiclePositionRecord};

/// Upper bound on a plausible arrival/departure delay magnitude, in seconds.
/// Updates more than three hours off schedule are treated as upstream clock
/// faults and rejected.
pub const MAX_DELAY_MAGNITUDE_SECS: i32 = 10_800;

/// Per-kind counters for one gate. `processed = valid + invalid`;
/// `duplicate` counts valid records dropped by the dedup cache.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ValidationStats {
    pub vehicles_processed: u64,
    pub vehicles_valid: u64,
    pub vehicles_invalid: u64,
    pub vehicles_duplicate: u64,
    pub trip_updates_processed: u64,
    pub trip_updates_valid: u64,
    pub trip_updates_invalid: u64,
    pub trip_updates_duplicate: u64,
}

/// Validates and deduplicates record batches.
///
/// The dedup cache grows with every new natural key; long-lived owners must
/// call [`QualityGate::evict`] on their own cadence to bound memory.
/// Deduplication across invocations works only while one gate instance is
/// deliberately kept alive between them.
#[derive(Debug, Default)]
pub struct QualityGate {
    seen_vehicles: HashSet<String>,
    seen_trip_updates: HashSet<String>,
    stats: ValidationStats,
}

impl QualityGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &ValidationStats {
        &self.stats
    }

    /// Zeroes the counters without touching the dedup cache.
    pub fn reset_stats(&mut self) {
        self.stats = ValidationStats::default();
    }

    /// Clears both natural-key sets. Independent of validation; the owner
    /// chooses the cadence.
    pub fn evict(&mut self) {
        self.seen_vehicles.clear();
        self.seen_trip_updates.clear();
    }

    /// Number of natural keys currently cached.
    pub fn cached_keys(&self) -> usize {
        self.seen_vehicles.len() + self.seen_trip_updates.len()
    }

    /// Drops invalid and already-seen position records, counting everything.
    pub fn clean_vehicles(
        &mut self,
        records: Vec<VehiclePositionRecord>,
    ) -> Vec<VehiclePositionRecord> {
        let mut cleaned = Vec::with_capacity(records.len());

        for record in records {
            self.stats.vehicles_processed += 1;

            if !validate_vehicle_position(&record) {
                self.stats.vehicles_invalid += 1;
                continue;
            }
            self.stats.vehicles_valid += 1;

            if !self.seen_vehicles.insert(vehicle_key(&record)) {
                self.stats.vehicles_duplicate += 1;
                continue;
            }

            cleaned.push(record);
        }

        cleaned
    }

    /// Drops invalid and already-seen trip updates, counting everything.
    pub fn clean_trip_updates(&mut self, records: Vec<TripUpdateRecord>) -> Vec<TripUpdateRecord> {
        let mut cleaned = Vec::with_capacity(records.len());

        for record in records {
            self.stats.trip_updates_processed += 1;

            if !validate_trip_update(&record) {
                self.stats.trip_updates_invalid += 1;
                continue;
            }
            self.stats.trip_updates_valid += 1;

            if !self.seen_trip_updates.insert(trip_update_key(&record)) {
                self.stats.trip_updates_duplicate += 1;
                continue;
            }

            cleaned.push(record);
        }

        cleaned
    }
}

fn key_time(ts: Option<&DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// Natural key: vehicle id + observation timestamp.
fn vehicle_key(record: &VehiclePositionRecord) -> String {
    format!(
        "{}#{}",
        record.vehicle_id.as_deref().unwrap_or_default(),
        key_time(record.timestamp.as_ref()),
    )
}

/// Natural key: trip id + stop id + feed snapshot timestamp.
fn trip_update_key(record: &TripUpdateRecord) -> String {
    format!(
        "{}#{}#{}",
        record.trip_id.as_deref().unwrap_or_default(),
        record.stop_id.as_deref().unwrap_or_default(),
        key_time(record.feed_timestamp.as_ref()),
    )
}

/// A position record needs a vehicle id, coordinates in range, a timestamp,
/// and a non-negative speed when one is reported. Missing optional fields
/// never reject.
pub fn validate_vehicle_position(record: &VehiclePositionRecord) -> bool {
    if record.vehicle_id.is_none() || record.timestamp.is_none() {
        return false;
    }

    let (Some(lat), Some(lon)) = (record.latitude, record.longitude) else {
        return false;
    };
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return false;
    }

    if record.speed.is_some_and(|s| s < 0.0) {
        return false;
    }

    true
}

/// A trip update needs its trip, stop, and feed snapshot identifiers. Null
/// delays are legitimate (skipped stops); reported delays are bounded by
/// [`MAX_DELAY_MAGNITUDE_SECS`].
pub fn validate_trip_update(record: &TripUpdateRecord) -> bool {
    if record.trip_id.is_none() || record.stop_id.is_none() || record.feed_timestamp.is_none() {
        return false;
    }

    let delay_out_of_bounds =
        |d: i32| d.checked_abs().is_none_or(|abs| abs > MAX_DELAY_MAGNITUDE_SECS);
    if record.arrival_delay.is_some_and(delay_out_of_bounds) {
        return false;
    }
    if record.departure_delay.is_some_and(delay_out_of_bounds) {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn vehicle(id: &str, lat: f64, lon: f64, t: i64) -> VehiclePositionRecord {
        VehiclePositionRecord {
            vehicle_id: Some(id.to_string()),
            trip_id: None,
            route_id: Some("7".to_string()),
            latitude: Some(lat),
            longitude: Some(lon),
            bearing: None,
            speed: None,
            timestamp: Some(ts(t)),
            current_stop_sequence: None,
            current_status: None,
            congestion_level: None,
            feed_timestamp: ts(t),
        }
    }

    fn trip_update(trip: &str, stop: &str, t: i64) -> TripUpdateRecord {
        TripUpdateRecord {
            trip_id: Some(trip.to_string()),
            route_id: Some("7".to_string()),
            vehicle_id: None,
            stop_id: Some(stop.to_string()),
            stop_sequence: None,
            arrival_delay: Some(120),
            arrival_time: None,
            departure_delay: None,
            departure_time: None,
            schedule_relationship: None,
            feed_timestamp: Some(ts(t)),
        }
    }

    #[test]
    fn test_valid_vehicle_passes() {
        assert!(validate_vehicle_position(&vehicle("1", 53.5, -113.5, 100)));
    }

    #[test]
    fn test_vehicle_required_fields() {
        let mut r = vehicle("1", 53.5, -113.5, 100);
        r.vehicle_id = None;
        assert!(!validate_vehicle_position(&r));

        let mut r = vehicle("1", 53.5, -113.5, 100);
        r.longitude = None;
        assert!(!validate_vehicle_position(&r));

        let mut r = vehicle("1", 53.5, -113.5, 100);
        r.timestamp = None;
        assert!(!validate_vehicle_position(&r));
    }

    #[test]
    fn test_vehicle_coordinate_ranges() {
        assert!(!validate_vehicle_position(&vehicle("1", 91.0, 0.0, 100)));
        assert!(!validate_vehicle_position(&vehicle("1", -91.0, 0.0, 100)));
        assert!(!validate_vehicle_position(&vehicle("1", 0.0, 181.0, 100)));
        assert!(!validate_vehicle_position(&vehicle("1", 0.0, -181.0, 100)));
        // Boundary values are in range.
        assert!(validate_vehicle_position(&vehicle("1", 90.0, -180.0, 100)));
    }

    #[test]
    fn test_vehicle_negative_speed_rejected() {
        let mut r = vehicle("1", 53.5, -113.5, 100);
        r.speed = Some(-1.0);
        assert!(!validate_vehicle_position(&r));

        r.speed = Some(0.0);
        assert!(validate_vehicle_position(&r));

        // Absent speed is fine.
        r.speed = None;
        assert!(validate_vehicle_position(&r));
    }

    #[test]
    fn test_trip_update_required_fields() {
        assert!(validate_trip_update(&trip_update("t", "s", 100)));

        let mut r = trip_update("t", "s", 100);
        r.trip_id = None;
        assert!(!validate_trip_update(&r));

        let mut r = trip_update("t", "s", 100);
        r.stop_id = None;
        assert!(!validate_trip_update(&r));

        let mut r = trip_update("t", "s", 100);
        r.feed_timestamp = None;
        assert!(!validate_trip_update(&r));
    }

    #[test]
    fn test_trip_update_null_delays_are_legitimate() {
        let mut r = trip_update("t", "s", 100);
        r.arrival_delay = None;
        r.departure_delay = None;
        assert!(validate_trip_update(&r));
    }

    #[test]
    fn test_trip_update_delay_ceiling() {
        let mut r = trip_update("t", "s", 100);
        r.arrival_delay = Some(MAX_DELAY_MAGNITUDE_SECS);
        assert!(validate_trip_update(&r));

        r.arrival_delay = Some(MAX_DELAY_MAGNITUDE_SECS + 1);
        assert!(!validate_trip_update(&r));

        r.arrival_delay = Some(-(MAX_DELAY_MAGNITUDE_SECS + 1));
        assert!(!validate_trip_update(&r));

        r.arrival_delay = None;
        r.departure_delay = Some(i32::MIN);
        assert!(!validate_trip_update(&r));
    }

    #[test]
    fn test_clean_vehicles_counts() {
        let mut gate = QualityGate::new();

        let records = vec![
            vehicle("1", 53.5, -113.5, 100),
            vehicle("1", 53.5, -113.5, 100), // duplicate key
            vehicle("2", 200.0, -113.5, 100), // invalid latitude
            vehicle("3", 53.6, -113.6, 160),
        ];

        let cleaned = gate.clean_vehicles(records);
        assert_eq!(cleaned.len(), 2);

        let stats = gate.stats();
        assert_eq!(stats.vehicles_processed, 4);
        assert_eq!(stats.vehicles_valid, 3);
        assert_eq!(stats.vehicles_invalid, 1);
        assert_eq!(stats.vehicles_duplicate, 1);
    }

    #[test]
    fn test_dedup_idempotence() {
        let mut gate = QualityGate::new();

        let records = vec![
            vehicle("1", 53.5, -113.5, 100),
            vehicle("2", 53.6, -113.6, 100),
            vehicle("3", 999.0, -113.5, 100), // invalid, never cached
        ];

        let first = gate.clean_vehicles(records.clone());
        assert_eq!(first.len(), 2);

        // Re-feeding the identical list accepts nothing new; the duplicate
        // counter grows by exactly the size of the valid subset.
        let second = gate.clean_vehicles(records);
        assert!(second.is_empty());
        assert_eq!(gate.stats().vehicles_duplicate, 2);
        assert_eq!(gate.stats().vehicles_invalid, 2);
    }

    #[test]
    fn test_duplicate_dropped_even_when_payload_differs() {
        let mut gate = QualityGate::new();

        let mut changed = vehicle("1", 53.5, -113.5, 100);
        changed.speed = Some(20.0);

        let cleaned = gate.clean_vehicles(vec![vehicle("1", 53.5, -113.5, 100), changed]);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].speed, None);
        assert_eq!(gate.stats().vehicles_duplicate, 1);
    }

    #[test]
    fn test_evict_allows_reaccept() {
        let mut gate = QualityGate::new();

        let first = gate.clean_vehicles(vec![vehicle("1", 53.5, -113.5, 100)]);
        assert_eq!(first.len(), 1);
        assert_eq!(gate.cached_keys(), 1);

        gate.evict();
        assert_eq!(gate.cached_keys(), 0);

        let again = gate.clean_vehicles(vec![vehicle("1", 53.5, -113.5, 100)]);
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn test_trip_update_dedup_key() {
        let mut gate = QualityGate::new();

        let records = vec![
            trip_update("t1", "s1", 100),
            trip_update("t1", "s2", 100), // different stop: not a duplicate
            trip_update("t1", "s1", 100), // same (trip, stop, snapshot)
            trip_update("t1", "s1", 160), // later snapshot: not a duplicate
        ];

        let cleaned = gate.clean_trip_updates(records);
        assert_eq!(cleaned.len(), 3);
        assert_eq!(gate.stats().trip_updates_duplicate, 1);
    }

    #[test]
    fn test_reset_stats_keeps_cache() {
        let mut gate = QualityGate::new();
        gate.clean_vehicles(vec![vehicle("1", 53.5, -113.5, 100)]);

        gate.reset_stats();
        assert_eq!(gate.stats().vehicles_processed, 0);

        // The cache survives the reset, so the record is still a duplicate.
        let cleaned = gate.clean_vehicles(vec![vehicle("1", 53.5, -113.5, 100)]);
        assert!(cleaned.is_empty());
        assert_eq!(gate.stats().vehicles_duplicate, 1);
    }
}
