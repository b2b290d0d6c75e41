//! One ingestion cycle: FETCH → PARSE → VALIDATE → ARCHIVE → STORE → REPORT.
//!
//! Every step may hand the next one an empty batch without aborting the
//! cycle, and every degradable fault is absorbed where it happens. The
//! invocation boundary is [`PipelineCoordinator::run_cycle`], which never
//! lets a raw fault escape: whatever goes wrong becomes a well-formed
//! failure report.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::archive::{BlobArchiver, ObjectStore};
use crate::fetch::{HttpClient, fetch_feed};
use crate::parser::{parse_trip_updates, parse_vehicle_positions};
use crate::quality::{QualityGate, ValidationStats};
use crate::records::RecordKind;
use crate::store::{KeyValueTable, RecordStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub vehicles: usize,
    pub trip_updates: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveLocations {
    pub vehicles: Option<String>,
    pub trip_updates: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreWriteCounts {
    pub vehicles: usize,
    pub trip_updates: usize,
}

/// Structured result of one invocation. Failure reports carry only status,
/// error, and timing.
#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<KindCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleaned: Option<KindCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_stats: Option<ValidationStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_locations: Option<ArchiveLocations>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_write_counts: Option<StoreWriteCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Orchestrates ingestion cycles and owns the dedup cache between them.
///
/// Whether the cache survives from one invocation to the next is a property
/// of how long the coordinator lives: a fresh coordinator per invocation
/// deduplicates within that invocation only, a long-lived one deduplicates
/// across cycles until [`PipelineCoordinator::evict_dedup_cache`] is called.
pub struct PipelineCoordinator<C, O, T>
where
    C: HttpClient,
    O: ObjectStore,
    T: KeyValueTable + 'static,
{
    http: C,
    archiver: BlobArchiver<O>,
    store: RecordStore<T>,
    gate: QualityGate,
    vehicle_positions_url: String,
    trip_updates_url: String,
    fetch_timeout: Duration,
}

impl<C, O, T> PipelineCoordinator<C, O, T>
where
    C: HttpClient,
    O: ObjectStore,
    T: KeyValueTable + 'static,
{
    pub fn new(
        http: C,
        archiver: BlobArchiver<O>,
        store: RecordStore<T>,
        vehicle_positions_url: String,
        trip_updates_url: String,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            http,
            archiver,
            store,
            gate: QualityGate::new(),
            vehicle_positions_url,
            trip_updates_url,
            fetch_timeout,
        }
    }

    /// Drops every cached dedup key. The orchestrator calls this on its own
    /// cadence to bound memory in long-lived deployments.
    pub fn evict_dedup_cache(&mut self) {
        info!(cached = self.gate.cached_keys(), "Evicting dedup cache");
        self.gate.evict();
    }

    /// Runs one full cycle and always returns a report; any fault not
    /// absorbed by an inner step is converted to a failure report here.
    pub async fn run_cycle(&mut self) -> IngestReport {
        let cycle_ts = Utc::now();
        let started = Instant::now();

        match self.ingest(cycle_ts).await {
            Ok(mut report) => {
                report.elapsed_ms = started.elapsed().as_millis() as u64;
                info!(elapsed_ms = report.elapsed_ms, "Ingestion cycle complete");
                report
            }
            Err(e) => {
                error!(error = %e, "Ingestion cycle failed");
                IngestReport {
                    status: "failure",
                    timestamp: cycle_ts,
                    parsed: None,
                    cleaned: None,
                    validation_stats: None,
                    archive_locations: None,
                    store_write_counts: None,
                    error: Some(format!("{e:#}")),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            }
        }
    }

    async fn ingest(&mut self, cycle_ts: DateTime<Utc>) -> anyhow::Result<IngestReport> {
        // Counters are per cycle; the dedup cache persists until evicted.
        self.gate.reset_stats();

        // The two feeds are data-independent: fetch them concurrently, each
        // under its own timeout. An unavailable feed parses to zero entities.
        let (vehicle_feed, trip_feed) = tokio::join!(
            fetch_feed(&self.http, &self.vehicle_positions_url, self.fetch_timeout),
            fetch_feed(&self.http, &self.trip_updates_url, self.fetch_timeout),
        );

        let vehicles = vehicle_feed
            .as_ref()
            .map(parse_vehicle_positions)
            .unwrap_or_default();
        let trip_updates = trip_feed
            .as_ref()
            .map(parse_trip_updates)
            .unwrap_or_default();

        let parsed = KindCounts {
            vehicles: vehicles.len(),
            trip_updates: trip_updates.len(),
        };
        info!(
            vehicles = parsed.vehicles,
            trip_updates = parsed.trip_updates,
            "Feeds parsed"
        );

        let clean_vehicles = self.gate.clean_vehicles(vehicles);
        let clean_trip_updates = self.gate.clean_trip_updates(trip_updates);

        let cleaned = KindCounts {
            vehicles: clean_vehicles.len(),
            trip_updates: clean_trip_updates.len(),
        };
        let validation_stats = self.gate.stats().clone();

        // One stable timestamp for both kinds keeps re-archiving idempotent.
        // A failed upload degrades to a null location; the cycle continues
        // to the store step.
        let archive_locations = ArchiveLocations {
            vehicles: match self
                .archiver
                .archive(&clean_vehicles, RecordKind::Vehicles, cycle_ts)
                .await
            {
                Ok(location) => location,
                Err(e) => {
                    error!(error = %e, kind = "vehicles", "Archive failed");
                    None
                }
            },
            trip_updates: match self
                .archiver
                .archive(&clean_trip_updates, RecordKind::TripUpdates, cycle_ts)
                .await
            {
                Ok(location) => location,
                Err(e) => {
                    error!(error = %e, kind = "trip_updates", "Archive failed");
                    None
                }
            },
        };

        let store_write_counts = StoreWriteCounts {
            vehicles: self.store.upsert(&clean_vehicles).await,
            trip_updates: self.store.upsert(&clean_trip_updates).await,
        };

        Ok(IngestReport {
            status: "success",
            timestamp: cycle_ts,
            parsed: Some(parsed),
            cleaned: Some(cleaned),
            validation_stats: Some(validation_stats),
            archive_locations: Some(archive_locations),
            store_write_counts: Some(store_write_counts),
            error: None,
            elapsed_ms: 0,
        })
    }
}
