//! Flattened record shapes produced by the parser and their storage keys.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder for identifiers absent from a record when building keys.
const UNKNOWN: &str = "UNKNOWN";

/// The two record streams the pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Vehicles,
    TripUpdates,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Vehicles => "vehicles",
            RecordKind::TripUpdates => "trip_updates",
        }
    }

    /// `record_type` attribute stamped on stored items of this kind.
    pub fn record_type(&self) -> &'static str {
        match self {
            RecordKind::Vehicles => VehiclePositionRecord::RECORD_TYPE,
            RecordKind::TripUpdates => TripUpdateRecord::RECORD_TYPE,
        }
    }

    /// Partition key grouping records of this kind by route.
    pub fn partition_key(&self, route_id: &str) -> String {
        match self {
            RecordKind::Vehicles => format!("VEHICLE#{route_id}"),
            RecordKind::TripUpdates => format!("TRIP#{route_id}"),
        }
    }
}

impl FromStr for RecordKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vehicles" => Ok(RecordKind::Vehicles),
            "trip_updates" => Ok(RecordKind::TripUpdates),
            other => Err(anyhow::anyhow!(
                "unknown record kind '{other}', expected 'vehicles' or 'trip_updates'"
            )),
        }
    }
}

/// One vehicle's reported position at one point in time.
///
/// Fields absent on the wire are `None`, never a zero default: an absent
/// bearing is not a bearing of 0. `current_status` and `congestion_level`
/// carry the raw wire enum numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehiclePositionRecord {
    pub vehicle_id: Option<String>,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub bearing: Option<f64>,
    pub speed: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub current_stop_sequence: Option<u32>,
    pub current_status: Option<i32>,
    pub congestion_level: Option<i32>,
    pub feed_timestamp: DateTime<Utc>,
}

/// One (trip, stop) delay update. A trip-update entity with N
/// stop-time-updates fans out into N of these, each copying the parent's
/// trip/route/vehicle identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripUpdateRecord {
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub vehicle_id: Option<String>,
    pub stop_id: Option<String>,
    pub stop_sequence: Option<u32>,
    pub arrival_delay: Option<i32>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub departure_delay: Option<i32>,
    pub departure_time: Option<DateTime<Utc>>,
    pub schedule_relationship: Option<i32>,
    pub feed_timestamp: Option<DateTime<Utc>>,
}

/// Key-value store addressing: the partition key groups records by kind and
/// route, the sort key orders them by time then identifier, so a partition
/// reads back chronologically without a secondary index.
///
/// Keys are pure functions of the record, which is what makes rewrites from
/// overlapping invocations idempotent.
pub trait StoreRecord: Serialize {
    /// Value of the `record_type` attribute on stored items.
    const RECORD_TYPE: &'static str;

    fn partition_key(&self) -> String;
    fn sort_key(&self) -> String;
}

fn sort_time(ts: Option<&DateTime<Utc>>) -> String {
    // Fixed-width RFC 3339 so lexicographic order is chronological order.
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

impl StoreRecord for VehiclePositionRecord {
    const RECORD_TYPE: &'static str = "vehicle_position";

    fn partition_key(&self) -> String {
        RecordKind::Vehicles.partition_key(self.route_id.as_deref().unwrap_or(UNKNOWN))
    }

    fn sort_key(&self) -> String {
        format!(
            "{}#{}",
            sort_time(self.timestamp.as_ref()),
            self.vehicle_id.as_deref().unwrap_or(UNKNOWN),
        )
    }
}

impl StoreRecord for TripUpdateRecord {
    const RECORD_TYPE: &'static str = "trip_update";

    fn partition_key(&self) -> String {
        RecordKind::TripUpdates.partition_key(self.route_id.as_deref().unwrap_or(UNKNOWN))
    }

    fn sort_key(&self) -> String {
        format!(
            "{}#{}#{}",
            sort_time(self.feed_timestamp.as_ref()),
            self.trip_id.as_deref().unwrap_or(UNKNOWN),
            self.stop_id.as_deref().unwrap_or(UNKNOWN),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn vehicle_record() -> VehiclePositionRecord {
        VehiclePositionRecord {
            vehicle_id: Some("1024".to_string()),
            trip_id: Some("trip-9".to_string()),
            route_id: Some("7".to_string()),
            latitude: Some(53.5461),
            longitude: Some(-113.4937),
            bearing: None,
            speed: Some(11.5),
            timestamp: Some(ts(1_700_000_000)),
            current_stop_sequence: Some(4),
            current_status: None,
            congestion_level: None,
            feed_timestamp: ts(1_700_000_010),
        }
    }

    #[test]
    fn test_vehicle_keys() {
        let record = vehicle_record();
        assert_eq!(record.partition_key(), "VEHICLE#7");
        assert_eq!(record.sort_key(), "2023-11-14T22:13:20Z#1024");
    }

    #[test]
    fn test_vehicle_keys_without_route() {
        let record = VehiclePositionRecord {
            route_id: None,
            ..vehicle_record()
        };
        assert_eq!(record.partition_key(), "VEHICLE#UNKNOWN");
    }

    #[test]
    fn test_trip_update_keys() {
        let record = TripUpdateRecord {
            trip_id: Some("trip-9".to_string()),
            route_id: Some("7".to_string()),
            vehicle_id: Some("1024".to_string()),
            stop_id: Some("stop-42".to_string()),
            stop_sequence: Some(3),
            arrival_delay: Some(120),
            arrival_time: None,
            departure_delay: None,
            departure_time: None,
            schedule_relationship: None,
            feed_timestamp: Some(ts(1_700_000_010)),
        };
        assert_eq!(record.partition_key(), "TRIP#7");
        assert_eq!(record.sort_key(), "2023-11-14T22:13:30Z#trip-9#stop-42");
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("vehicles".parse::<RecordKind>().unwrap(), RecordKind::Vehicles);
        assert_eq!(
            "trip_updates".parse::<RecordKind>().unwrap(),
            RecordKind::TripUpdates
        );
        assert!("alerts".parse::<RecordKind>().is_err());
    }
}
