//! Outpatient Prospective Payment System engine
//!
//! Packaged status indicators (N, J1, Q1-Q3) suppress separate payment:
//! the line reports `packaged = true` with a zero allowed amount.
//! Separately-payable lines wage-adjust the national unadjusted rate by
//! the quarterly CBSA wage index.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{
    apply_modifiers, apply_quantity, cost_sharing, LineResult, PricingContext, PricingEngine,
    PricingError, PricingResult,
};
use crate::cache::CacheManager;
use crate::store::{PricingStore, ScheduleStore};
use crate::types::{scale_cents, PlanComponent, RateSource, Setting};

pub struct OppsEngine {
    store: Arc<dyn PricingStore>,
    cache: Arc<CacheManager>,
}

impl OppsEngine {
    pub fn new(store: Arc<dyn PricingStore>, cache: Arc<CacheManager>) -> Self {
        Self { store, cache }
    }
}

#[async_trait]
impl PricingEngine for OppsEngine {
    fn setting(&self) -> Setting {
        Setting::Opps
    }

    async fn price(
        &self,
        ctx: &PricingContext,
        component: &PlanComponent,
    ) -> PricingResult<LineResult> {
        let year = ctx.period.year;
        let quarter = ctx.period.quarter_or_default();
        let code = component.code.clone();

        let row_key = format!("opps:{}:{}:{}", year, quarter, code);
        let row = self
            .cache
            .get_or_compute(&row_key, None, || self.store.opps_row(year, quarter, &code))
            .await?
            .ok_or_else(|| PricingError::SchedulePricingMiss {
                setting: Setting::Opps,
                code: code.clone(),
            })?;

        if row.is_packaged() {
            debug!(code = %code, status_indicator = %row.status_indicator, "OPPS line is packaged");
            let mut line = LineResult::packaged_zero(ctx);
            line.trace_refs = vec![format!("opps_{}_{}_{}", year, quarter, code)];
            line.dataset_digests = vec![row.dataset_digest];
            return Ok(line);
        }

        let cbsa = ctx.resolution.cbsa.clone().ok_or_else(|| {
            PricingError::RequiredReferenceMiss {
                what: "CBSA for outpatient wage adjustment".to_string(),
            }
        })?;

        let wage_key = format!("wage:{}:{}:{}", year, quarter, cbsa);
        let wage = self
            .cache
            .get_or_compute(&wage_key, None, || {
                self.store.wage_index(year, Some(quarter), &cbsa)
            })
            .await?
            .ok_or_else(|| PricingError::RequiredReferenceMiss {
                what: format!("wage index for CBSA {} in {} Q{}", cbsa, year, quarter),
            })?;

        let wage_adjusted_cents = scale_cents(row.national_unadj_rate_cents, wage.wage_index);
        let (modified_cents, modifiers_applied) =
            apply_modifiers(wage_adjusted_cents, &component.modifiers);
        let allowed_cents = apply_quantity(modified_cents, component);

        let sharing = cost_sharing(
            allowed_cents,
            ctx.deductible_remaining_cents,
            ctx.benefits.part_b_coinsurance_rate,
        );

        Ok(LineResult {
            allowed_cents,
            beneficiary_deductible_cents: sharing.deductible_cents,
            beneficiary_coinsurance_cents: sharing.coinsurance_cents,
            beneficiary_total_cents: sharing.beneficiary_total_cents,
            program_payment_cents: sharing.program_payment_cents,
            professional_allowed_cents: 0,
            facility_allowed_cents: if component.facility_component {
                allowed_cents
            } else {
                0
            },
            packaged: false,
            facility_specific: false,
            source: RateSource::Benchmark,
            reference_price_cents: None,
            unit_conversion: None,
            trace_refs: vec![
                format!("opps_{}_{}_{}", year, quarter, code),
                format!("wage_index_{}_{}_{}", year, quarter, cbsa),
            ],
            dataset_digests: vec![row.dataset_digest, wage.dataset_digest],
            modifiers_applied,
            notes: Vec::new(),
            deductible_remaining_cents: sharing.remaining_after_cents,
        })
    }
}
