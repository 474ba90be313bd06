//! Durable Medical Equipment, Prosthetics, Orthotics and Supplies engine
//!
//! Fees are keyed by `(year, quarter, code, rural)`; the rural split is
//! decided by the resolver's rural flag (R or B both count as rural).

use async_trait::async_trait;
use std::sync::Arc;

use super::{
    apply_modifiers, apply_quantity, cost_sharing, LineResult, PricingContext, PricingEngine,
    PricingError, PricingResult,
};
use crate::cache::CacheManager;
use crate::resolver::is_rural;
use crate::store::{PricingStore, ScheduleStore};
use crate::types::{PlanComponent, RateSource, Setting};

pub struct DmeposEngine {
    store: Arc<dyn PricingStore>,
    cache: Arc<CacheManager>,
}

impl DmeposEngine {
    pub fn new(store: Arc<dyn PricingStore>, cache: Arc<CacheManager>) -> Self {
        Self { store, cache }
    }
}

#[async_trait]
impl PricingEngine for DmeposEngine {
    fn setting(&self) -> Setting {
        Setting::Dmepos
    }

    async fn price(
        &self,
        ctx: &PricingContext,
        component: &PlanComponent,
    ) -> PricingResult<LineResult> {
        let year = ctx.period.year;
        let quarter = ctx.period.quarter_or_default();
        let code = component.code.clone();
        let rural = is_rural(ctx.resolution.rural_flag);

        let key = format!("dmepos:{}:{}:{}:{}", year, quarter, code, rural);
        let row = self
            .cache
            .get_or_compute(&key, None, || {
                self.store.dmepos_row(year, quarter, &code, rural)
            })
            .await?
            .ok_or_else(|| PricingError::SchedulePricingMiss {
                setting: Setting::Dmepos,
                code: code.clone(),
            })?;

        let (modified_cents, modifiers_applied) =
            apply_modifiers(row.fee_cents, &component.modifiers);
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
            professional_allowed_cents: if component.professional_component {
                allowed_cents
            } else {
                0
            },
            facility_allowed_cents: 0,
            packaged: false,
            facility_specific: false,
            source: RateSource::Benchmark,
            reference_price_cents: None,
            unit_conversion: None,
            trace_refs: vec![format!(
                "dmepos_{}_{}_{}_{}",
                year,
                quarter,
                code,
                if rural { "rural" } else { "nonrural" }
            )],
            dataset_digests: vec![row.dataset_digest],
            modifiers_applied,
            notes: Vec::new(),
            deductible_remaining_cents: sharing.remaining_after_cents,
        })
    }
}
