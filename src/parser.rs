//! Protobuf decoding and flattening of GTFS Realtime feeds.
//!
//! Each vehicle entity becomes one [`VehiclePositionRecord`]; each
//! trip-update entity fans out into one [`TripUpdateRecord`] per
//! stop-time-update. Absent wire fields stay `None` so downstream code can
//! tell "not reported" from a real zero.

use anyhow::Result;
use chrono::{DateTime, Utc};
use prost::Message;
use tracing::debug;

use crate::gtfs_rt::FeedMessage;
use crate::records::{TripUpdateRecord, VehiclePositionRecord};

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    Ok(FeedMessage::decode(bytes)?)
}

fn epoch_to_utc(secs: u64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::try_from(secs).ok()?, 0)
}

fn epoch_i64_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Flattens every vehicle entity into one position record.
///
/// Timestamp fallback order: per-entity timestamp, then the feed header
/// timestamp, then the current processing time (an approximation, used only
/// when the feed reports no time at all).
pub fn parse_vehicle_positions(feed: &FeedMessage) -> Vec<VehiclePositionRecord> {
    let header_ts = feed.header.timestamp.and_then(epoch_to_utc);
    let feed_timestamp = header_ts.unwrap_or_else(Utc::now);

    let mut records = Vec::new();

    for entity in &feed.entity {
        let Some(v) = &entity.vehicle else {
            continue;
        };

        let timestamp = v
            .timestamp
            .and_then(epoch_to_utc)
            .or(header_ts)
            .or_else(|| Some(Utc::now()));

        records.push(VehiclePositionRecord {
            vehicle_id: v.vehicle.as_ref().and_then(|d| d.id.clone()),
            trip_id: v.trip.as_ref().and_then(|t| t.trip_id.clone()),
            route_id: v.trip.as_ref().and_then(|t| t.route_id.clone()),
            latitude: v.position.as_ref().map(|p| f64::from(p.latitude)),
            longitude: v.position.as_ref().map(|p| f64::from(p.longitude)),
            bearing: v.position.as_ref().and_then(|p| p.bearing).map(f64::from),
            speed: v.position.as_ref().and_then(|p| p.speed).map(f64::from),
            timestamp,
            current_stop_sequence: v.current_stop_sequence,
            current_status: v.current_status,
            congestion_level: v.congestion_level,
            feed_timestamp,
        });
    }

    debug!(count = records.len(), "Vehicle positions flattened");
    records
}

/// Flattens every trip-update entity into one record per stop-time-update,
/// each copying the parent's trip/route/vehicle identifiers. The repetition
/// buys a flat, joinless downstream schema.
pub fn parse_trip_updates(feed: &FeedMessage) -> Vec<TripUpdateRecord> {
    let feed_timestamp = feed
        .header
        .timestamp
        .and_then(epoch_to_utc)
        .or_else(|| Some(Utc::now()));

    let mut records = Vec::new();

    for entity in &feed.entity {
        let Some(tu) = &entity.trip_update else {
            continue;
        };

        let trip_id = tu.trip.trip_id.clone();
        let route_id = tu.trip.route_id.clone();
        let vehicle_id = tu.vehicle.as_ref().and_then(|d| d.id.clone());

        for stu in &tu.stop_time_update {
            records.push(TripUpdateRecord {
                trip_id: trip_id.clone(),
                route_id: route_id.clone(),
                vehicle_id: vehicle_id.clone(),
                stop_id: stu.stop_id.clone(),
                stop_sequence: stu.stop_sequence,
                arrival_delay: stu.arrival.as_ref().and_then(|e| e.delay),
                arrival_time: stu
                    .arrival
                    .as_ref()
                    .and_then(|e| e.time)
                    .and_then(epoch_i64_to_utc),
                departure_delay: stu.departure.as_ref().and_then(|e| e.delay),
                departure_time: stu
                    .departure
                    .as_ref()
                    .and_then(|e| e.time)
                    .and_then(epoch_i64_to_utc),
                schedule_relationship: stu.schedule_relationship,
                feed_timestamp,
            });
        }
    }

    debug!(count = records.len(), "Trip updates flattened");
    records
}
