//! Inpatient Prospective Payment System engine
//!
//! `payment = DRG weight × (operating_base·WI + capital_base·WI)` with
//! the annual (quarter-less) CBSA wage index. Cost sharing is the Part A
//! per-admission deductible from benefit parameters, applied entirely to
//! the DRG line with no coinsurance; the Part B deductible is untouched.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{
    apply_modifiers, apply_quantity, LineResult, PricingContext, PricingEngine, PricingError,
    PricingResult,
};
use crate::cache::CacheManager;
use crate::store::{PricingStore, ScheduleStore};
use crate::types::{scale_cents, PlanComponent, RateSource, Setting};

pub struct IppsEngine {
    store: Arc<dyn PricingStore>,
    cache: Arc<CacheManager>,
}

impl IppsEngine {
    pub fn new(store: Arc<dyn PricingStore>, cache: Arc<CacheManager>) -> Self {
        Self { store, cache }
    }
}

#[async_trait]
impl PricingEngine for IppsEngine {
    fn setting(&self) -> Setting {
        Setting::Ipps
    }

    async fn price(
        &self,
        ctx: &PricingContext,
        component: &PlanComponent,
    ) -> PricingResult<LineResult> {
        let fiscal_year = ctx.period.year;
        let drg = component.code.clone();

        let drg_key = format!("ipps:{}:{}", fiscal_year, drg);
        let drg_row = self
            .cache
            .get_or_compute(&drg_key, None, || self.store.drg_row(fiscal_year, &drg))
            .await?
            .ok_or_else(|| PricingError::SchedulePricingMiss {
                setting: Setting::Ipps,
                code: drg.clone(),
            })?;

        let cbsa = ctx.resolution.cbsa.clone().ok_or_else(|| {
            PricingError::RequiredReferenceMiss {
                what: "CBSA for inpatient wage adjustment".to_string(),
            }
        })?;

        let base_key = format!("ipps_base:{}", fiscal_year);
        let wage_key = format!("wage:{}:annual:{}", fiscal_year, cbsa);
        let (base, wage) = futures_util::try_join!(
            self.cache
                .get_or_compute(&base_key, None, || self.store.ipps_base_rates(fiscal_year)),
            self.cache.get_or_compute(&wage_key, None, || {
                self.store.wage_index(fiscal_year, None, &cbsa)
            }),
        )?;
        let base = base.ok_or_else(|| PricingError::RequiredReferenceMiss {
            what: format!("IPPS base rates for FY {}", fiscal_year),
        })?;
        let wage = wage.ok_or_else(|| PricingError::RequiredReferenceMiss {
            what: format!("annual wage index for CBSA {} in {}", cbsa, fiscal_year),
        })?;

        let operating_cents = scale_cents(base.operating_base_cents, wage.wage_index);
        let capital_cents = scale_cents(base.capital_base_cents, wage.wage_index);
        let base_payment_cents =
            scale_cents(operating_cents + capital_cents, drg_row.relative_weight);
        debug!(
            drg = %drg,
            weight = drg_row.relative_weight,
            base_payment_cents = base_payment_cents,
            "computed inpatient base payment"
        );

        let (modified_cents, modifiers_applied) =
            apply_modifiers(base_payment_cents, &component.modifiers);
        let allowed_cents = apply_quantity(modified_cents, component);

        // Part A admission deductible allocated entirely to this line
        let deductible = ctx.benefits.part_a_deductible_cents.min(allowed_cents);

        Ok(LineResult {
            allowed_cents,
            beneficiary_deductible_cents: deductible,
            beneficiary_coinsurance_cents: 0,
            beneficiary_total_cents: deductible,
            program_payment_cents: allowed_cents - deductible,
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
                format!("ipps_{}_{}", fiscal_year, drg),
                format!("ipps_base_{}", fiscal_year),
                format!("wage_index_{}_{}", fiscal_year, cbsa),
            ],
            dataset_digests: vec![
                drg_row.dataset_digest,
                base.dataset_digest,
                wage.dataset_digest,
            ],
            modifiers_applied,
            notes: Vec::new(),
            deductible_remaining_cents: ctx.deductible_remaining_cents,
        })
    }
}
