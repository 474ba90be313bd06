//! In-memory store implementation
//!
//! Backs the integration tests and local tooling. Tables are plain
//! vectors behind one `RwLock`; selection semantics (effective-window
//! overlap, greatest `effective_from` wins) match the Postgres store.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    stats_from_traces, GeographyStore, PlanStore, RunStore, ScheduleStore, SnapshotStore,
    StoreError, StoreResult,
};
use crate::types::{
    window_covers, window_overlaps, AscRow, BenefitParams, ClfsRow, ConversionFactor,
    ConversionFactorKind, DigestPin, DmeposRow, DrgRow, DrugAspRow, GeographyRow, GpciRow,
    IppsBaseRates, MpfsRow, NadacRow, NdcCrosswalkRow, OppsRow, Plan, ResolutionStats,
    ResolutionTrace, Snapshot, StoredRun, ValuationPeriod, WageIndexRow, ZipGeometry,
};

#[derive(Default)]
struct Tables {
    geography: Vec<GeographyRow>,
    zip_geometry: Vec<ZipGeometry>,
    mpfs: Vec<MpfsRow>,
    gpci: Vec<GpciRow>,
    conversion_factors: Vec<ConversionFactor>,
    opps: Vec<OppsRow>,
    wage_index: Vec<WageIndexRow>,
    drg: Vec<DrgRow>,
    ipps_base: Vec<IppsBaseRates>,
    asc: Vec<AscRow>,
    clfs: Vec<ClfsRow>,
    dmepos: Vec<DmeposRow>,
    drug_asp: Vec<DrugAspRow>,
    nadac: Vec<NadacRow>,
    ndc_crosswalk: Vec<NdcCrosswalkRow>,
    benefit_params: Vec<BenefitParams>,
    plans: HashMap<Uuid, Plan>,
    runs: HashMap<Uuid, StoredRun>,
    resolution_traces: Vec<ResolutionTrace>,
    snapshots: Vec<Snapshot>,
    pins: HashMap<String, DigestPin>,
}

/// In-process store over plain tables.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Seeding surface, used by tests and fixtures. The serving traits
    // stay read-only for reference data.

    pub async fn insert_geography_row(&self, row: GeographyRow) {
        self.tables.write().await.geography.push(row);
    }

    pub async fn insert_zip_geometry(&self, row: ZipGeometry) {
        self.tables.write().await.zip_geometry.push(row);
    }

    pub async fn insert_mpfs_row(&self, row: MpfsRow) {
        self.tables.write().await.mpfs.push(row);
    }

    pub async fn insert_gpci_row(&self, row: GpciRow) {
        self.tables.write().await.gpci.push(row);
    }

    pub async fn insert_conversion_factor(&self, row: ConversionFactor) {
        self.tables.write().await.conversion_factors.push(row);
    }

    pub async fn insert_opps_row(&self, row: OppsRow) {
        self.tables.write().await.opps.push(row);
    }

    pub async fn insert_wage_index(&self, row: WageIndexRow) {
        self.tables.write().await.wage_index.push(row);
    }

    pub async fn insert_drg_row(&self, row: DrgRow) {
        self.tables.write().await.drg.push(row);
    }

    pub async fn insert_ipps_base_rates(&self, row: IppsBaseRates) {
        self.tables.write().await.ipps_base.push(row);
    }

    pub async fn insert_asc_row(&self, row: AscRow) {
        self.tables.write().await.asc.push(row);
    }

    pub async fn insert_clfs_row(&self, row: ClfsRow) {
        self.tables.write().await.clfs.push(row);
    }

    pub async fn insert_dmepos_row(&self, row: DmeposRow) {
        self.tables.write().await.dmepos.push(row);
    }

    pub async fn insert_drug_asp_row(&self, row: DrugAspRow) {
        self.tables.write().await.drug_asp.push(row);
    }

    pub async fn insert_nadac_row(&self, row: NadacRow) {
        self.tables.write().await.nadac.push(row);
    }

    pub async fn insert_ndc_crosswalk(&self, row: NdcCrosswalkRow) {
        self.tables.write().await.ndc_crosswalk.push(row);
    }

    pub async fn insert_benefit_params(&self, row: BenefitParams) {
        self.tables.write().await.benefit_params.push(row);
    }
}

/// Among rows overlapping the period, pick the one with the greatest
/// `effective_from`.
fn select_effective<'a, T>(
    rows: impl Iterator<Item = &'a T>,
    period: &ValuationPeriod,
    window: impl Fn(&T) -> (NaiveDate, Option<NaiveDate>),
) -> Option<&'a T> {
    rows.filter(|r| {
        let (from, to) = window(r);
        window_overlaps(from, to, period.period_start, period.period_end)
    })
    .max_by_key(|r| window(r).0)
}

#[async_trait]
impl GeographyStore for MemoryStore {
    async fn zip_plus4_row(
        &self,
        zip5: &str,
        plus4: &str,
        period: &ValuationPeriod,
    ) -> StoreResult<Option<GeographyRow>> {
        let tables = self.tables.read().await;
        Ok(select_effective(
            tables
                .geography
                .iter()
                .filter(|r| r.has_plus4 && r.zip5 == zip5 && r.plus4.as_deref() == Some(plus4)),
            period,
            |r| (r.effective_from, r.effective_to),
        )
        .cloned())
    }

    async fn zip5_row(
        &self,
        zip5: &str,
        period: &ValuationPeriod,
    ) -> StoreResult<Option<GeographyRow>> {
        let tables = self.tables.read().await;
        Ok(select_effective(
            tables
                .geography
                .iter()
                .filter(|r| !r.has_plus4 && r.zip5 == zip5),
            period,
            |r| (r.effective_from, r.effective_to),
        )
        .cloned())
    }

    async fn state_zip_row(
        &self,
        zip5: &str,
        state: &str,
        period: &ValuationPeriod,
    ) -> StoreResult<Option<GeographyRow>> {
        let tables = self.tables.read().await;
        Ok(select_effective(
            tables
                .geography
                .iter()
                .filter(|r| r.zip5 == zip5 && r.state == state),
            period,
            |r| (r.effective_from, r.effective_to),
        )
        .cloned())
    }

    async fn zip_geometry(&self, zip5: &str, on: NaiveDate) -> StoreResult<Option<ZipGeometry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .zip_geometry
            .iter()
            .filter(|g| g.zip5 == zip5 && window_covers(g.effective_from, g.effective_to, on))
            .max_by_key(|g| g.effective_from)
            .cloned())
    }

    async fn state_geometries(
        &self,
        state: &str,
        exclude_zip5: &str,
        on: NaiveDate,
    ) -> StoreResult<Vec<ZipGeometry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .zip_geometry
            .iter()
            .filter(|g| {
                g.state == state
                    && g.zip5 != exclude_zip5
                    && window_covers(g.effective_from, g.effective_to, on)
            })
            .cloned()
            .collect())
    }

    async fn geography_rows(&self) -> StoreResult<Vec<GeographyRow>> {
        Ok(self.tables.read().await.geography.clone())
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn mpfs_row(
        &self,
        year: i32,
        locality_id: &str,
        hcpcs: &str,
    ) -> StoreResult<Option<MpfsRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .mpfs
            .iter()
            .find(|r| r.year == year && r.locality_id == locality_id && r.hcpcs == hcpcs)
            .cloned())
    }

    async fn gpci_row(&self, year: i32, locality_id: &str) -> StoreResult<Option<GpciRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .gpci
            .iter()
            .find(|r| r.year == year && r.locality_id == locality_id)
            .cloned())
    }

    async fn conversion_factor(
        &self,
        year: i32,
        kind: ConversionFactorKind,
    ) -> StoreResult<Option<ConversionFactor>> {
        let tables = self.tables.read().await;
        Ok(tables
            .conversion_factors
            .iter()
            .find(|r| r.year == year && r.kind == kind)
            .cloned())
    }

    async fn opps_row(&self, year: i32, quarter: u8, hcpcs: &str) -> StoreResult<Option<OppsRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .opps
            .iter()
            .find(|r| r.year == year && r.quarter == quarter && r.hcpcs == hcpcs)
            .cloned())
    }

    async fn wage_index(
        &self,
        year: i32,
        quarter: Option<u8>,
        cbsa: &str,
    ) -> StoreResult<Option<WageIndexRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .wage_index
            .iter()
            .find(|r| r.year == year && r.quarter == quarter && r.cbsa == cbsa)
            .cloned())
    }

    async fn drg_row(&self, fiscal_year: i32, drg_code: &str) -> StoreResult<Option<DrgRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .drg
            .iter()
            .find(|r| r.fiscal_year == fiscal_year && r.drg_code == drg_code)
            .cloned())
    }

    async fn ipps_base_rates(&self, fiscal_year: i32) -> StoreResult<Option<IppsBaseRates>> {
        let tables = self.tables.read().await;
        Ok(tables
            .ipps_base
            .iter()
            .find(|r| r.fiscal_year == fiscal_year)
            .cloned())
    }

    async fn asc_row(&self, year: i32, quarter: u8, hcpcs: &str) -> StoreResult<Option<AscRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .asc
            .iter()
            .find(|r| r.year == year && r.quarter == quarter && r.hcpcs == hcpcs)
            .cloned())
    }

    async fn clfs_row(&self, year: i32, quarter: u8, hcpcs: &str) -> StoreResult<Option<ClfsRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .clfs
            .iter()
            .find(|r| r.year == year && r.quarter == quarter && r.hcpcs == hcpcs)
            .cloned())
    }

    async fn dmepos_row(
        &self,
        year: i32,
        quarter: u8,
        code: &str,
        rural: bool,
    ) -> StoreResult<Option<DmeposRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .dmepos
            .iter()
            .find(|r| r.year == year && r.quarter == quarter && r.code == code && r.rural == rural)
            .cloned())
    }

    async fn drug_asp_row(
        &self,
        year: i32,
        quarter: u8,
        hcpcs: &str,
    ) -> StoreResult<Option<DrugAspRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .drug_asp
            .iter()
            .find(|r| r.year == year && r.quarter == quarter && r.hcpcs == hcpcs)
            .cloned())
    }

    async fn latest_nadac(&self, ndc11: &str) -> StoreResult<Option<NadacRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .nadac
            .iter()
            .filter(|r| r.ndc11 == ndc11)
            .max_by_key(|r| r.as_of)
            .cloned())
    }

    async fn ndc_crosswalk(
        &self,
        ndc11: &str,
        hcpcs: &str,
    ) -> StoreResult<Option<NdcCrosswalkRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .ndc_crosswalk
            .iter()
            .find(|r| r.ndc11 == ndc11 && r.hcpcs == hcpcs)
            .cloned())
    }

    async fn benefit_params(&self, year: i32) -> StoreResult<Option<BenefitParams>> {
        let tables = self.tables.read().await;
        Ok(tables
            .benefit_params
            .iter()
            .find(|r| r.year == year)
            .cloned())
    }
}

#[async_trait]
impl PlanStore for MemoryStore {
    async fn plan(&self, id: Uuid) -> StoreResult<Option<Plan>> {
        Ok(self.tables.read().await.plans.get(&id).cloned())
    }

    async fn upsert_plan(&self, plan: &Plan) -> StoreResult<()> {
        let mut plan = plan.clone();
        plan.components.sort_by_key(|c| c.sequence);
        self.tables.write().await.plans.insert(plan.id, plan);
        Ok(())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn store_run(&self, run: &StoredRun) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.runs.contains_key(&run.run.run_id) {
            return Err(StoreError::Other(format!(
                "run {} already stored",
                run.run.run_id
            )));
        }
        tables.runs.insert(run.run.run_id, run.clone());
        Ok(())
    }

    async fn run(&self, run_id: Uuid) -> StoreResult<Option<StoredRun>> {
        Ok(self.tables.read().await.runs.get(&run_id).cloned())
    }

    async fn store_resolution_trace(&self, trace: &ResolutionTrace) -> StoreResult<()> {
        self.tables.write().await.resolution_traces.push(trace.clone());
        Ok(())
    }

    async fn resolution_stats(&self, zip5: Option<&str>) -> StoreResult<ResolutionStats> {
        let tables = self.tables.read().await;
        let filtered: Vec<ResolutionTrace> = tables
            .resolution_traces
            .iter()
            .filter(|t| zip5.map_or(true, |z| t.zip5 == z))
            .cloned()
            .collect();
        Ok(stats_from_traces(&filtered))
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn snapshots(&self, dataset_id: &str) -> StoreResult<Vec<Snapshot>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Snapshot> = tables
            .snapshots
            .iter()
            .filter(|s| s.dataset_id == dataset_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.effective_from);
        Ok(rows)
    }

    async fn snapshot_by_digest(&self, digest: &str) -> StoreResult<Option<Snapshot>> {
        let tables = self.tables.read().await;
        Ok(tables.snapshots.iter().find(|s| s.digest == digest).cloned())
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()> {
        self.tables.write().await.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn record_pin(&self, pin: &DigestPin) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .pins
            .insert(pin.pin_name.clone(), pin.clone());
        Ok(())
    }

    async fn pin(&self, pin_name: &str) -> StoreResult<Option<DigestPin>> {
        Ok(self.tables.read().await.pins.get(pin_name).cloned())
    }
}
