//! Storage traits for reference data, plans, runs, and snapshots
//!
//! The serving path is read-only against reference tables: ingestion is an
//! external producer that appends snapshot rows. Traits are split by
//! concern so engines depend only on schedule lookups while the
//! orchestrator sees the whole store.
//!
//! Two implementations ship with the crate:
//! - [`PgStore`]: Postgres via sqlx, the production store
//! - [`MemoryStore`]: in-process tables, used by tests and local tooling

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{
    AscRow, BenefitParams, ClfsRow, ConversionFactor, ConversionFactorKind, DigestPin, DmeposRow,
    DrgRow, DrugAspRow, GeographyRow, GpciRow, IppsBaseRates, MpfsRow, NadacRow, NdcCrosswalkRow,
    OppsRow, Plan, ResolutionStats, ResolutionTrace, Snapshot, StoredRun, ValuationPeriod,
    WageIndexRow, ZipGeometry,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error for JSON columns
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entity not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Generic store error
    #[error("store error: {0}")]
    Other(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// ZIP-to-locality rows and ZIP geometry for the resolver.
#[async_trait]
pub trait GeographyStore: Send + Sync {
    /// Exact ZIP+4 row whose effective window overlaps the period.
    async fn zip_plus4_row(
        &self,
        zip5: &str,
        plus4: &str,
        period: &ValuationPeriod,
    ) -> StoreResult<Option<GeographyRow>>;

    /// Exact ZIP5-only row whose effective window overlaps the period.
    async fn zip5_row(&self, zip5: &str, period: &ValuationPeriod)
        -> StoreResult<Option<GeographyRow>>;

    /// Geography row for a (ZIP5, state) pair, used after a
    /// nearest-neighbor candidate was chosen.
    async fn state_zip_row(
        &self,
        zip5: &str,
        state: &str,
        period: &ValuationPeriod,
    ) -> StoreResult<Option<GeographyRow>>;

    /// Representative geometry point for a ZIP on a date.
    async fn zip_geometry(&self, zip5: &str, on: NaiveDate) -> StoreResult<Option<ZipGeometry>>;

    /// All geometry points in a state whose window covers the date,
    /// excluding the given source ZIP.
    async fn state_geometries(
        &self,
        state: &str,
        exclude_zip5: &str,
        on: NaiveDate,
    ) -> StoreResult<Vec<ZipGeometry>>;

    /// Every geography row, in store order. Used for digest computation.
    async fn geography_rows(&self) -> StoreResult<Vec<GeographyRow>>;
}

/// Fee-schedule and reference lookups for the pricing engines.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn mpfs_row(
        &self,
        year: i32,
        locality_id: &str,
        hcpcs: &str,
    ) -> StoreResult<Option<MpfsRow>>;

    async fn gpci_row(&self, year: i32, locality_id: &str) -> StoreResult<Option<GpciRow>>;

    async fn conversion_factor(
        &self,
        year: i32,
        kind: ConversionFactorKind,
    ) -> StoreResult<Option<ConversionFactor>>;

    async fn opps_row(&self, year: i32, quarter: u8, hcpcs: &str) -> StoreResult<Option<OppsRow>>;

    /// Wage index; `quarter = None` selects the annual row (IPPS).
    async fn wage_index(
        &self,
        year: i32,
        quarter: Option<u8>,
        cbsa: &str,
    ) -> StoreResult<Option<WageIndexRow>>;

    async fn drg_row(&self, fiscal_year: i32, drg_code: &str) -> StoreResult<Option<DrgRow>>;

    async fn ipps_base_rates(&self, fiscal_year: i32) -> StoreResult<Option<IppsBaseRates>>;

    async fn asc_row(&self, year: i32, quarter: u8, hcpcs: &str) -> StoreResult<Option<AscRow>>;

    async fn clfs_row(&self, year: i32, quarter: u8, hcpcs: &str) -> StoreResult<Option<ClfsRow>>;

    async fn dmepos_row(
        &self,
        year: i32,
        quarter: u8,
        code: &str,
        rural: bool,
    ) -> StoreResult<Option<DmeposRow>>;

    async fn drug_asp_row(
        &self,
        year: i32,
        quarter: u8,
        hcpcs: &str,
    ) -> StoreResult<Option<DrugAspRow>>;

    /// Most recent NADAC row for an NDC, by `as_of` descending.
    async fn latest_nadac(&self, ndc11: &str) -> StoreResult<Option<NadacRow>>;

    async fn ndc_crosswalk(
        &self,
        ndc11: &str,
        hcpcs: &str,
    ) -> StoreResult<Option<NdcCrosswalkRow>>;

    /// Benefit parameters for a valuation year, if ingested.
    async fn benefit_params(&self, year: i32) -> StoreResult<Option<BenefitParams>>;
}

/// Stored treatment plans.
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn plan(&self, id: Uuid) -> StoreResult<Option<Plan>>;

    /// Insert or replace a plan. Component replacement is atomic: readers
    /// never observe a partially-updated component list.
    async fn upsert_plan(&self, plan: &Plan) -> StoreResult<()>;
}

/// Append-only run and trace persistence.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a run with all child rows atomically: either every row
    /// lands or none do.
    async fn store_run(&self, run: &StoredRun) -> StoreResult<()>;

    async fn run(&self, run_id: Uuid) -> StoreResult<Option<StoredRun>>;

    /// Persist one resolution trace. Callers treat failures as
    /// non-fatal.
    async fn store_resolution_trace(&self, trace: &ResolutionTrace) -> StoreResult<()>;

    /// Aggregate statistics over resolution traces, optionally filtered
    /// by ZIP.
    async fn resolution_stats(&self, zip5: Option<&str>) -> StoreResult<ResolutionStats>;
}

/// Snapshot catalog and digest pins.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn snapshots(&self, dataset_id: &str) -> StoreResult<Vec<Snapshot>>;

    async fn snapshot_by_digest(&self, digest: &str) -> StoreResult<Option<Snapshot>>;

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()>;

    async fn record_pin(&self, pin: &DigestPin) -> StoreResult<()>;

    async fn pin(&self, pin_name: &str) -> StoreResult<Option<DigestPin>>;
}

/// The full store surface the orchestrator and CLI operate against.
pub trait PricingStore:
    GeographyStore + ScheduleStore + PlanStore + RunStore + SnapshotStore
{
}

impl<T> PricingStore for T where
    T: GeographyStore + ScheduleStore + PlanStore + RunStore + SnapshotStore
{
}

/// Compute latency aggregates shared by both store implementations.
pub(crate) fn stats_from_traces(traces: &[ResolutionTrace]) -> ResolutionStats {
    use crate::types::MatchLevel;
    use std::collections::HashSet;

    if traces.is_empty() {
        return ResolutionStats::default();
    }

    let mut latencies: Vec<f64> = traces.iter().map(|t| t.latency_ms).collect();
    latencies.sort_by(|a, b| a.partial_cmp(b).expect("latencies are finite"));
    let p95_idx = ((latencies.len() as f64) * 0.95) as usize;

    let count = |level: MatchLevel| traces.iter().filter(|t| t.match_level == level).count() as u64;

    ResolutionStats {
        total_calls: traces.len() as u64,
        zip4_matches: count(MatchLevel::ZipPlus4),
        zip5_matches: count(MatchLevel::Zip5),
        nearest_matches: count(MatchLevel::Nearest),
        default_matches: count(MatchLevel::Default),
        errors: count(MatchLevel::Error),
        avg_latency_ms: latencies.iter().sum::<f64>() / latencies.len() as f64,
        p95_latency_ms: latencies[p95_idx.min(latencies.len() - 1)],
        unique_zips: traces.iter().map(|t| t.zip5.as_str()).collect::<HashSet<_>>().len() as u64,
        unique_states: traces
            .iter()
            .filter_map(|t| t.state.as_deref())
            .collect::<HashSet<_>>()
            .len() as u64,
    }
}
