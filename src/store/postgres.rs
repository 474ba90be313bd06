//! Postgres store implementation over sqlx
//!
//! Reference tables are read-only at serving time; ingestion appends rows
//! out of band. Run persistence is transactional so a run either exists
//! with all of its child rows or not at all.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use super::{
    stats_from_traces, GeographyStore, PlanStore, RunStore, ScheduleStore, SnapshotStore,
    StoreResult,
};
use crate::types::{
    AscRow, BenefitParams, ClfsRow, ConversionFactor, ConversionFactorKind, DigestPin, DmeposRow,
    DrgRow, DrugAspRow, GeographyRow, GpciRow, IppsBaseRates, MatchLevel, MpfsRow, NadacRow,
    NdcCrosswalkRow, OppsRow, Plan, PlanComponent, ResolutionStats, ResolutionTrace, RunInput,
    RunOutput, RunRecord, RunStatus, RunTraceEntry, Setting, Snapshot, StoredRun,
    ValuationPeriod, WageIndexRow, ZipGeometry,
};

/// sqlx-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with a modest pool sized for a read-mostly workload.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        debug!("connected to postgres store");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn geography_from_row(row: &sqlx::postgres::PgRow) -> GeographyRow {
    let rural: Option<String> = row.get("rural_flag");
    GeographyRow {
        zip5: row.get("zip5"),
        plus4: row.get("plus4"),
        has_plus4: row.get("has_plus4"),
        state: row.get("state"),
        locality_id: row.get("locality_id"),
        carrier_id: row.get("carrier_id"),
        cbsa: row.get("cbsa"),
        rural_flag: rural.as_deref().and_then(crate::types::RuralFlag::parse),
        effective_from: row.get("effective_from"),
        effective_to: row.get("effective_to"),
        dataset_digest: row.get("dataset_digest"),
    }
}

const GEOGRAPHY_COLS: &str = "zip5, plus4, has_plus4, state, locality_id, carrier_id, cbsa, \
     rural_flag, effective_from, effective_to, dataset_digest";

#[async_trait]
impl GeographyStore for PgStore {
    async fn zip_plus4_row(
        &self,
        zip5: &str,
        plus4: &str,
        period: &ValuationPeriod,
    ) -> StoreResult<Option<GeographyRow>> {
        let sql = format!(
            "SELECT {GEOGRAPHY_COLS} FROM geography \
             WHERE zip5 = $1 AND plus4 = $2 AND has_plus4 \
               AND effective_from <= $3 \
               AND (effective_to IS NULL OR effective_to > $4) \
             ORDER BY effective_from DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(zip5)
            .bind(plus4)
            .bind(period.period_end)
            .bind(period.period_start)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(geography_from_row))
    }

    async fn zip5_row(
        &self,
        zip5: &str,
        period: &ValuationPeriod,
    ) -> StoreResult<Option<GeographyRow>> {
        let sql = format!(
            "SELECT {GEOGRAPHY_COLS} FROM geography \
             WHERE zip5 = $1 AND NOT has_plus4 \
               AND effective_from <= $2 \
               AND (effective_to IS NULL OR effective_to > $3) \
             ORDER BY effective_from DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(zip5)
            .bind(period.period_end)
            .bind(period.period_start)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(geography_from_row))
    }

    async fn state_zip_row(
        &self,
        zip5: &str,
        state: &str,
        period: &ValuationPeriod,
    ) -> StoreResult<Option<GeographyRow>> {
        let sql = format!(
            "SELECT {GEOGRAPHY_COLS} FROM geography \
             WHERE zip5 = $1 AND state = $2 \
               AND effective_from <= $3 \
               AND (effective_to IS NULL OR effective_to > $4) \
             ORDER BY effective_from DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(zip5)
            .bind(state)
            .bind(period.period_end)
            .bind(period.period_start)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(geography_from_row))
    }

    async fn zip_geometry(&self, zip5: &str, on: NaiveDate) -> StoreResult<Option<ZipGeometry>> {
        let row = sqlx::query_as::<_, (String, f64, f64, String, bool, NaiveDate, Option<NaiveDate>)>(
            "SELECT zip5, lat, lon, state, is_pobox, effective_from, effective_to \
             FROM zip_geometry \
             WHERE zip5 = $1 AND effective_from <= $2 \
               AND (effective_to IS NULL OR effective_to > $2) \
             ORDER BY effective_from DESC LIMIT 1",
        )
        .bind(zip5)
        .bind(on)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(zip5, lat, lon, state, is_pobox, effective_from, effective_to)| ZipGeometry {
            zip5,
            lat,
            lon,
            state,
            is_pobox,
            effective_from,
            effective_to,
        }))
    }

    async fn state_geometries(
        &self,
        state: &str,
        exclude_zip5: &str,
        on: NaiveDate,
    ) -> StoreResult<Vec<ZipGeometry>> {
        let rows = sqlx::query_as::<_, (String, f64, f64, String, bool, NaiveDate, Option<NaiveDate>)>(
            "SELECT zip5, lat, lon, state, is_pobox, effective_from, effective_to \
             FROM zip_geometry \
             WHERE state = $1 AND zip5 <> $2 AND effective_from <= $3 \
               AND (effective_to IS NULL OR effective_to > $3)",
        )
        .bind(state)
        .bind(exclude_zip5)
        .bind(on)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(zip5, lat, lon, state, is_pobox, effective_from, effective_to)| ZipGeometry {
                zip5,
                lat,
                lon,
                state,
                is_pobox,
                effective_from,
                effective_to,
            })
            .collect())
    }

    async fn geography_rows(&self) -> StoreResult<Vec<GeographyRow>> {
        let sql = format!("SELECT {GEOGRAPHY_COLS} FROM geography");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(geography_from_row).collect())
    }
}

#[async_trait]
impl ScheduleStore for PgStore {
    async fn mpfs_row(
        &self,
        year: i32,
        locality_id: &str,
        hcpcs: &str,
    ) -> StoreResult<Option<MpfsRow>> {
        let row = sqlx::query_as::<_, (f64, f64, f64, f64, Option<String>, Option<String>, String)>(
            "SELECT work_rvu, pe_nonfac_rvu, pe_fac_rvu, malp_rvu, status_code, global_days, \
                    dataset_digest \
             FROM fee_mpfs WHERE year = $1 AND locality_id = $2 AND hcpcs = $3",
        )
        .bind(year)
        .bind(locality_id)
        .bind(hcpcs)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(
            |(work_rvu, pe_nonfac_rvu, pe_fac_rvu, malp_rvu, status_code, global_days, digest)| {
                MpfsRow {
                    year,
                    locality_id: locality_id.to_string(),
                    hcpcs: hcpcs.to_string(),
                    work_rvu,
                    pe_nonfac_rvu,
                    pe_fac_rvu,
                    malp_rvu,
                    status_code,
                    global_days,
                    dataset_digest: digest,
                }
            },
        ))
    }

    async fn gpci_row(&self, year: i32, locality_id: &str) -> StoreResult<Option<GpciRow>> {
        let row = sqlx::query_as::<_, (f64, f64, f64, String)>(
            "SELECT gpci_work, gpci_pe, gpci_malp, dataset_digest \
             FROM gpci WHERE year = $1 AND locality_id = $2",
        )
        .bind(year)
        .bind(locality_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(gpci_work, gpci_pe, gpci_malp, digest)| GpciRow {
            year,
            locality_id: locality_id.to_string(),
            gpci_work,
            gpci_pe,
            gpci_malp,
            dataset_digest: digest,
        }))
    }

    async fn conversion_factor(
        &self,
        year: i32,
        kind: ConversionFactorKind,
    ) -> StoreResult<Option<ConversionFactor>> {
        let row = sqlx::query_as::<_, (f64, String)>(
            "SELECT value, dataset_digest FROM conversion_factors WHERE year = $1 AND kind = $2",
        )
        .bind(year)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(value, digest)| ConversionFactor {
            year,
            kind,
            value,
            dataset_digest: digest,
        }))
    }

    async fn opps_row(&self, year: i32, quarter: u8, hcpcs: &str) -> StoreResult<Option<OppsRow>> {
        let row = sqlx::query_as::<_, (String, Option<String>, i64, bool, String)>(
            "SELECT status_indicator, apc_code, national_unadj_rate_cents, packaging_flag, \
                    dataset_digest \
             FROM fee_opps WHERE year = $1 AND quarter = $2 AND hcpcs = $3",
        )
        .bind(year)
        .bind(quarter as i16)
        .bind(hcpcs)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(
            |(status_indicator, apc_code, national_unadj_rate_cents, packaging_flag, digest)| {
                OppsRow {
                    year,
                    quarter,
                    hcpcs: hcpcs.to_string(),
                    status_indicator,
                    apc_code,
                    national_unadj_rate_cents,
                    packaging_flag,
                    dataset_digest: digest,
                }
            },
        ))
    }

    async fn wage_index(
        &self,
        year: i32,
        quarter: Option<u8>,
        cbsa: &str,
    ) -> StoreResult<Option<WageIndexRow>> {
        let row = sqlx::query_as::<_, (f64, String)>(
            "SELECT wage_index, dataset_digest FROM wage_index \
             WHERE year = $1 AND quarter IS NOT DISTINCT FROM $2 AND cbsa = $3",
        )
        .bind(year)
        .bind(quarter.map(|q| q as i16))
        .bind(cbsa)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(wage_index, digest)| WageIndexRow {
            year,
            quarter,
            cbsa: cbsa.to_string(),
            wage_index,
            dataset_digest: digest,
        }))
    }

    async fn drg_row(&self, fiscal_year: i32, drg_code: &str) -> StoreResult<Option<DrgRow>> {
        let row = sqlx::query_as::<_, (f64, String)>(
            "SELECT relative_weight, dataset_digest FROM fee_ipps \
             WHERE fiscal_year = $1 AND drg_code = $2",
        )
        .bind(fiscal_year)
        .bind(drg_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(relative_weight, digest)| DrgRow {
            fiscal_year,
            drg_code: drg_code.to_string(),
            relative_weight,
            dataset_digest: digest,
        }))
    }

    async fn ipps_base_rates(&self, fiscal_year: i32) -> StoreResult<Option<IppsBaseRates>> {
        let row = sqlx::query_as::<_, (i64, i64, String)>(
            "SELECT operating_base_cents, capital_base_cents, dataset_digest \
             FROM ipps_base_rates WHERE fiscal_year = $1",
        )
        .bind(fiscal_year)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(operating_base_cents, capital_base_cents, digest)| IppsBaseRates {
            fiscal_year,
            operating_base_cents,
            capital_base_cents,
            dataset_digest: digest,
        }))
    }

    async fn asc_row(&self, year: i32, quarter: u8, hcpcs: &str) -> StoreResult<Option<AscRow>> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT fee_cents, dataset_digest FROM fee_asc \
             WHERE year = $1 AND quarter = $2 AND hcpcs = $3",
        )
        .bind(year)
        .bind(quarter as i16)
        .bind(hcpcs)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(fee_cents, digest)| AscRow {
            year,
            quarter,
            hcpcs: hcpcs.to_string(),
            fee_cents,
            dataset_digest: digest,
        }))
    }

    async fn clfs_row(&self, year: i32, quarter: u8, hcpcs: &str) -> StoreResult<Option<ClfsRow>> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT fee_cents, dataset_digest FROM fee_clfs \
             WHERE year = $1 AND quarter = $2 AND hcpcs = $3",
        )
        .bind(year)
        .bind(quarter as i16)
        .bind(hcpcs)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(fee_cents, digest)| ClfsRow {
            year,
            quarter,
            hcpcs: hcpcs.to_string(),
            fee_cents,
            dataset_digest: digest,
        }))
    }

    async fn dmepos_row(
        &self,
        year: i32,
        quarter: u8,
        code: &str,
        rural: bool,
    ) -> StoreResult<Option<DmeposRow>> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT fee_cents, dataset_digest FROM fee_dmepos \
             WHERE year = $1 AND quarter = $2 AND code = $3 AND rural = $4",
        )
        .bind(year)
        .bind(quarter as i16)
        .bind(code)
        .bind(rural)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(fee_cents, digest)| DmeposRow {
            year,
            quarter,
            code: code.to_string(),
            rural,
            fee_cents,
            dataset_digest: digest,
        }))
    }

    async fn drug_asp_row(
        &self,
        year: i32,
        quarter: u8,
        hcpcs: &str,
    ) -> StoreResult<Option<DrugAspRow>> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT asp_per_unit_cents, dataset_digest FROM drug_asp \
             WHERE year = $1 AND quarter = $2 AND hcpcs = $3",
        )
        .bind(year)
        .bind(quarter as i16)
        .bind(hcpcs)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(asp_per_unit_cents, digest)| DrugAspRow {
            year,
            quarter,
            hcpcs: hcpcs.to_string(),
            asp_per_unit_cents,
            dataset_digest: digest,
        }))
    }

    async fn latest_nadac(&self, ndc11: &str) -> StoreResult<Option<NadacRow>> {
        let row = sqlx::query_as::<_, (NaiveDate, i64, String, String)>(
            "SELECT as_of, unit_price_cents, unit_type, dataset_digest FROM drug_nadac \
             WHERE ndc11 = $1 ORDER BY as_of DESC LIMIT 1",
        )
        .bind(ndc11)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(as_of, unit_price_cents, unit_type, digest)| NadacRow {
            as_of,
            ndc11: ndc11.to_string(),
            unit_price_cents,
            unit_type,
            dataset_digest: digest,
        }))
    }

    async fn ndc_crosswalk(
        &self,
        ndc11: &str,
        hcpcs: &str,
    ) -> StoreResult<Option<NdcCrosswalkRow>> {
        let row = sqlx::query_as::<_, (f64, String)>(
            "SELECT units_per_hcpcs, dataset_digest FROM ndc_hcpcs_xwalk \
             WHERE ndc11 = $1 AND hcpcs = $2",
        )
        .bind(ndc11)
        .bind(hcpcs)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(units_per_hcpcs, digest)| NdcCrosswalkRow {
            ndc11: ndc11.to_string(),
            hcpcs: hcpcs.to_string(),
            units_per_hcpcs,
            dataset_digest: digest,
        }))
    }

    async fn benefit_params(&self, year: i32) -> StoreResult<Option<BenefitParams>> {
        let row = sqlx::query_as::<_, (i64, f64, i64)>(
            "SELECT part_b_deductible_cents, part_b_coinsurance_rate, part_a_deductible_cents \
             FROM benefit_params WHERE year = $1",
        )
        .bind(year)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(
            |(part_b_deductible_cents, part_b_coinsurance_rate, part_a_deductible_cents)| {
                BenefitParams {
                    year,
                    part_b_deductible_cents,
                    part_b_coinsurance_rate,
                    part_a_deductible_cents,
                }
            },
        ))
    }
}

#[async_trait]
impl PlanStore for PgStore {
    async fn plan(&self, id: Uuid) -> StoreResult<Option<Plan>> {
        let plan_row = sqlx::query_as::<_, (String, Option<String>, DateTime<Utc>, Option<DateTime<Utc>>)>(
            "SELECT name, description, created_at, updated_at FROM plans WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((name, description, created_at, updated_at)) = plan_row else {
            return Ok(None);
        };

        let component_rows = sqlx::query(
            "SELECT sequence, code, setting, units, utilization_weight, professional_component, \
                    facility_component, modifiers, pos, ndc11, wastage_units \
             FROM plan_components WHERE plan_id = $1 \
             ORDER BY sequence ASC, created_at ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let components = component_rows
            .iter()
            .map(|row| {
                let setting: String = row.get("setting");
                let setting = setting
                    .parse::<Setting>()
                    .map_err(super::StoreError::Other)?;
                Ok(PlanComponent {
                    sequence: row.get("sequence"),
                    code: row.get("code"),
                    setting,
                    units: row.get("units"),
                    utilization_weight: row.get("utilization_weight"),
                    professional_component: row.get("professional_component"),
                    facility_component: row.get("facility_component"),
                    modifiers: row.get("modifiers"),
                    pos: row.get("pos"),
                    ndc11: row.get("ndc11"),
                    wastage_units: row.get("wastage_units"),
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Some(Plan {
            id,
            name,
            description,
            created_at,
            updated_at,
            components,
        }))
    }

    async fn upsert_plan(&self, plan: &Plan) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO plans (id, name, description, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET \
               name = EXCLUDED.name, description = EXCLUDED.description, \
               updated_at = EXCLUDED.updated_at",
        )
        .bind(plan.id)
        .bind(&plan.name)
        .bind(&plan.description)
        .bind(plan.created_at)
        .bind(plan.updated_at)
        .execute(&mut *tx)
        .await?;

        // Replace components atomically within the transaction
        sqlx::query("DELETE FROM plan_components WHERE plan_id = $1")
            .bind(plan.id)
            .execute(&mut *tx)
            .await?;

        for component in &plan.components {
            sqlx::query(
                "INSERT INTO plan_components \
                   (plan_id, sequence, code, setting, units, utilization_weight, \
                    professional_component, facility_component, modifiers, pos, ndc11, \
                    wastage_units, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now())",
            )
            .bind(plan.id)
            .bind(component.sequence)
            .bind(&component.code)
            .bind(component.setting.as_str())
            .bind(component.units)
            .bind(component.utilization_weight)
            .bind(component.professional_component)
            .bind(component.facility_component)
            .bind(&component.modifiers)
            .bind(&component.pos)
            .bind(&component.ndc11)
            .bind(component.wastage_units)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl RunStore for PgStore {
    async fn store_run(&self, run: &StoredRun) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO runs (run_id, endpoint, request_json, response_json, status, \
                               started_at, duration_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(run.run.run_id)
        .bind(&run.run.endpoint)
        .bind(&run.run.request)
        .bind(&run.run.response)
        .bind(run.run.status.as_str())
        .bind(run.run.started_at)
        .bind(run.run.duration_ms)
        .execute(&mut *tx)
        .await?;

        for input in &run.inputs {
            sqlx::query(
                "INSERT INTO run_inputs (run_id, parameter_name, parameter_value, parameter_type) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(run.run.run_id)
            .bind(&input.parameter_name)
            .bind(&input.parameter_value)
            .bind(&input.parameter_type)
            .execute(&mut *tx)
            .await?;
        }

        for output in &run.outputs {
            sqlx::query(
                "INSERT INTO run_outputs \
                   (run_id, line_sequence, code, setting, allowed_cents, \
                    beneficiary_deductible_cents, beneficiary_coinsurance_cents, \
                    beneficiary_total_cents, program_payment_cents, source, trace_refs, \
                    dataset_digests) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(run.run.run_id)
            .bind(output.line_sequence)
            .bind(&output.code)
            .bind(&output.setting)
            .bind(output.allowed_cents)
            .bind(output.beneficiary_deductible_cents)
            .bind(output.beneficiary_coinsurance_cents)
            .bind(output.beneficiary_total_cents)
            .bind(output.program_payment_cents)
            .bind(&output.source)
            .bind(&output.trace_refs)
            .bind(&output.dataset_digests)
            .execute(&mut *tx)
            .await?;
        }

        for trace in &run.traces {
            sqlx::query(
                "INSERT INTO run_trace (run_id, trace_type, trace_data, line_sequence) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(run.run.run_id)
            .bind(&trace.kind)
            .bind(&trace.payload)
            .bind(trace.line_sequence)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn run(&self, run_id: Uuid) -> StoreResult<Option<StoredRun>> {
        let run_row = sqlx::query_as::<_, (
            String,
            serde_json::Value,
            Option<serde_json::Value>,
            String,
            DateTime<Utc>,
            i64,
        )>(
            "SELECT endpoint, request_json, response_json, status, started_at, duration_ms \
             FROM runs WHERE run_id = $1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((endpoint, request, response, status, started_at, duration_ms)) = run_row else {
            return Ok(None);
        };

        let status = match status.as_str() {
            "success" => RunStatus::Success,
            "partial" => RunStatus::Partial,
            _ => RunStatus::Error,
        };

        let inputs = sqlx::query_as::<_, (String, Option<String>, String)>(
            "SELECT parameter_name, parameter_value, parameter_type \
             FROM run_inputs WHERE run_id = $1",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(parameter_name, parameter_value, parameter_type)| RunInput {
            parameter_name,
            parameter_value,
            parameter_type,
        })
        .collect();

        let outputs = sqlx::query(
            "SELECT line_sequence, code, setting, allowed_cents, beneficiary_deductible_cents, \
                    beneficiary_coinsurance_cents, beneficiary_total_cents, program_payment_cents, \
                    source, trace_refs, dataset_digests \
             FROM run_outputs WHERE run_id = $1 ORDER BY line_sequence ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| RunOutput {
            line_sequence: row.get("line_sequence"),
            code: row.get("code"),
            setting: row.get("setting"),
            allowed_cents: row.get("allowed_cents"),
            beneficiary_deductible_cents: row.get("beneficiary_deductible_cents"),
            beneficiary_coinsurance_cents: row.get("beneficiary_coinsurance_cents"),
            beneficiary_total_cents: row.get("beneficiary_total_cents"),
            program_payment_cents: row.get("program_payment_cents"),
            source: row.get("source"),
            trace_refs: row.get("trace_refs"),
            dataset_digests: row.get("dataset_digests"),
        })
        .collect();

        let traces = sqlx::query_as::<_, (String, serde_json::Value, Option<i32>)>(
            "SELECT trace_type, trace_data, line_sequence FROM run_trace WHERE run_id = $1",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(kind, payload, line_sequence)| RunTraceEntry {
            kind,
            payload,
            line_sequence,
        })
        .collect();

        Ok(Some(StoredRun {
            run: RunRecord {
                run_id,
                endpoint,
                request,
                response,
                status,
                started_at,
                duration_ms,
            },
            inputs,
            outputs,
            traces,
        }))
    }

    async fn store_resolution_trace(&self, trace: &ResolutionTrace) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO geography_resolution_traces \
               (zip5, plus4, inputs_json, match_level, locality_id, state, rural_flag, \
                nearest_zip, distance_miles, dataset_digest, latency_ms, service_version, \
                error_code, error_message, resolved_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(&trace.zip5)
        .bind(&trace.plus4)
        .bind(&trace.inputs)
        .bind(trace.match_level.as_str())
        .bind(&trace.locality_id)
        .bind(&trace.state)
        .bind(trace.rural_flag.map(|f| f.as_str()))
        .bind(&trace.nearest_zip)
        .bind(trace.distance_miles)
        .bind(&trace.dataset_digest)
        .bind(trace.latency_ms)
        .bind(&trace.service_version)
        .bind(&trace.error_code)
        .bind(&trace.error_message)
        .bind(trace.resolved_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn resolution_stats(&self, zip5: Option<&str>) -> StoreResult<ResolutionStats> {
        let rows = sqlx::query(
            "SELECT zip5, plus4, inputs_json, match_level, locality_id, state, rural_flag, \
                    nearest_zip, distance_miles, dataset_digest, latency_ms, service_version, \
                    error_code, error_message, resolved_at \
             FROM geography_resolution_traces \
             WHERE $1::text IS NULL OR zip5 = $1",
        )
        .bind(zip5)
        .fetch_all(&self.pool)
        .await?;

        let traces: Vec<ResolutionTrace> = rows
            .iter()
            .map(|row| {
                let match_level: String = row.get("match_level");
                let rural_flag: Option<String> = row.get("rural_flag");
                ResolutionTrace {
                    zip5: row.get("zip5"),
                    plus4: row.get("plus4"),
                    inputs: row.get("inputs_json"),
                    match_level: match match_level.as_str() {
                        "zip+4" => MatchLevel::ZipPlus4,
                        "zip5" => MatchLevel::Zip5,
                        "nearest" => MatchLevel::Nearest,
                        "default" => MatchLevel::Default,
                        _ => MatchLevel::Error,
                    },
                    locality_id: row.get("locality_id"),
                    state: row.get("state"),
                    rural_flag: rural_flag.as_deref().and_then(crate::types::RuralFlag::parse),
                    nearest_zip: row.get("nearest_zip"),
                    distance_miles: row.get("distance_miles"),
                    dataset_digest: row.get("dataset_digest"),
                    latency_ms: row.get("latency_ms"),
                    service_version: row.get("service_version"),
                    error_code: row.get("error_code"),
                    error_message: row.get("error_message"),
                    resolved_at: row.get("resolved_at"),
                }
            })
            .collect();

        Ok(stats_from_traces(&traces))
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn snapshots(&self, dataset_id: &str) -> StoreResult<Vec<Snapshot>> {
        let rows = sqlx::query_as::<_, (
            NaiveDate,
            Option<NaiveDate>,
            String,
            serde_json::Value,
            DateTime<Utc>,
        )>(
            "SELECT effective_from, effective_to, digest, manifest_json, created_at \
             FROM snapshots WHERE dataset_id = $1 ORDER BY effective_from ASC",
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(effective_from, effective_to, digest, manifest, created_at)| Snapshot {
                dataset_id: dataset_id.to_string(),
                effective_from,
                effective_to,
                digest,
                manifest,
                created_at,
            })
            .collect())
    }

    async fn snapshot_by_digest(&self, digest: &str) -> StoreResult<Option<Snapshot>> {
        let row = sqlx::query_as::<_, (
            String,
            NaiveDate,
            Option<NaiveDate>,
            serde_json::Value,
            DateTime<Utc>,
        )>(
            "SELECT dataset_id, effective_from, effective_to, manifest_json, created_at \
             FROM snapshots WHERE digest = $1 LIMIT 1",
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(dataset_id, effective_from, effective_to, manifest, created_at)| Snapshot {
            dataset_id,
            effective_from,
            effective_to,
            digest: digest.to_string(),
            manifest,
            created_at,
        }))
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO snapshots (dataset_id, effective_from, effective_to, digest, \
                                    manifest_json, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&snapshot.dataset_id)
        .bind(snapshot.effective_from)
        .bind(snapshot.effective_to)
        .bind(&snapshot.digest)
        .bind(&snapshot.manifest)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_pin(&self, pin: &DigestPin) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO digest_pins (pin_name, digest, pinned_at) VALUES ($1, $2, $3) \
             ON CONFLICT (pin_name) DO UPDATE SET digest = EXCLUDED.digest, \
               pinned_at = EXCLUDED.pinned_at",
        )
        .bind(&pin.pin_name)
        .bind(&pin.digest)
        .bind(pin.pinned_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pin(&self, pin_name: &str) -> StoreResult<Option<DigestPin>> {
        let row = sqlx::query_as::<_, (String, DateTime<Utc>)>(
            "SELECT digest, pinned_at FROM digest_pins WHERE pin_name = $1",
        )
        .bind(pin_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(digest, pinned_at)| DigestPin {
            pin_name: pin_name.to_string(),
            digest,
            pinned_at,
        }))
    }
}
