//! Environment-driven configuration.

use std::time::Duration;

/// Runtime settings, read once at startup. Every value has a default, so
/// the binary runs against the Edmonton Transit endpoints out of the box;
/// a `.env` file loaded by the entry point can override any of them.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub vehicle_positions_url: String,
    pub trip_updates_url: String,
    pub s3_bucket: String,
    pub dynamo_table: String,
    pub fetch_timeout: Duration,
    pub store_write_concurrency: usize,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let fetch_timeout_secs = env_or("FETCH_TIMEOUT_SECS", "30").parse().unwrap_or(30);
        let store_write_concurrency =
            env_or("STORE_WRITE_CONCURRENCY", "4").parse().unwrap_or(4);

        Self {
            vehicle_positions_url: env_or(
                "GTFS_RT_VEHICLE_POSITIONS_URL",
                "https://gtfs.edmonton.ca/TMGTFSRealTimeWebService/Vehicle/VehiclePositions.pb",
            ),
            trip_updates_url: env_or(
                "GTFS_RT_TRIP_UPDATES_URL",
                "https://gtfs.edmonton.ca/TMGTFSRealTimeWebService/TripUpdate/TripUpdates.pb",
            ),
            s3_bucket: env_or("S3_BUCKET_NAME", "ets-transit-data"),
            dynamo_table: env_or("DYNAMODB_TABLE_NAME", "ets_transit_processed"),
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            store_write_concurrency,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
