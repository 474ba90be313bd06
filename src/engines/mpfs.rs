//! Medicare Physician Fee Schedule engine
//!
//! `allowed = (work·gpci_work + pe·gpci_pe + malp·gpci_malp) × CF`, where
//! the practice-expense RVU is selected by place of service: office and
//! clinic settings (POS 11-21) use the non-facility PE RVU, everything
//! else (including an unset POS) uses the facility PE RVU.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{
    apply_modifiers, apply_quantity, cost_sharing, LineResult, PricingContext, PricingEngine,
    PricingError, PricingResult,
};
use crate::cache::CacheManager;
use crate::store::{PricingStore, ScheduleStore};
use crate::types::{
    dollars_to_cents, ConversionFactorKind, PlanComponent, RateSource, Setting,
};

pub struct MpfsEngine {
    store: Arc<dyn PricingStore>,
    cache: Arc<CacheManager>,
}

impl MpfsEngine {
    pub fn new(store: Arc<dyn PricingStore>, cache: Arc<CacheManager>) -> Self {
        Self { store, cache }
    }
}

/// Office and clinic POS codes that price at the non-facility PE RVU.
fn is_non_facility_pos(pos: &str) -> bool {
    matches!(pos.parse::<u8>(), Ok(11..=21))
}

#[async_trait]
impl PricingEngine for MpfsEngine {
    fn setting(&self) -> Setting {
        Setting::Mpfs
    }

    async fn price(
        &self,
        ctx: &PricingContext,
        component: &PlanComponent,
    ) -> PricingResult<LineResult> {
        let year = ctx.period.year;
        let locality = ctx.resolution.locality_id.clone();
        let code = component.code.clone();

        let row_key = format!("mpfs:{}:{}:{}", year, locality, code);
        let row = self
            .cache
            .get_or_compute(&row_key, None, || self.store.mpfs_row(year, &locality, &code))
            .await?
            .ok_or_else(|| PricingError::SchedulePricingMiss {
                setting: Setting::Mpfs,
                code: code.clone(),
            })?;

        let gpci_key = format!("gpci:{}:{}", year, locality);
        let cf_key = format!("cf:{}:physician", year);
        let (gpci, cf) = futures_util::try_join!(
            self.cache
                .get_or_compute(&gpci_key, None, || self.store.gpci_row(year, &locality)),
            self.cache.get_or_compute(&cf_key, None, || {
                self.store
                    .conversion_factor(year, ConversionFactorKind::Physician)
            }),
        )?;
        let gpci = gpci.ok_or_else(|| PricingError::RequiredReferenceMiss {
            what: format!("GPCI for locality {} in {}", locality, year),
        })?;
        let cf = cf.ok_or_else(|| PricingError::RequiredReferenceMiss {
            what: format!("physician conversion factor for {}", year),
        })?;

        let pe_rvu = match component.pos.as_deref() {
            Some(pos) if is_non_facility_pos(pos) => row.pe_nonfac_rvu,
            _ => row.pe_fac_rvu,
        };

        let total_rvu = row.work_rvu * gpci.gpci_work
            + pe_rvu * gpci.gpci_pe
            + row.malp_rvu * gpci.gpci_malp;
        let base_cents = dollars_to_cents(total_rvu * cf.value);
        debug!(
            code = %code,
            locality = %locality,
            total_rvu = total_rvu,
            base_cents = base_cents,
            "computed physician base rate"
        );

        let (modified_cents, modifiers_applied) =
            apply_modifiers(base_cents, &component.modifiers);
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
            trace_refs: vec![
                format!("mpfs_{}_{}_{}", year, locality, code),
                format!("gpci_{}_{}", year, locality),
                format!("cf_{}_physician", year),
            ],
            dataset_digests: vec![
                row.dataset_digest,
                gpci.dataset_digest,
                cf.dataset_digest,
            ],
            modifiers_applied,
            notes: Vec::new(),
            deductible_remaining_cents: sharing.remaining_after_cents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pos_selects_pe_rvu() {
        assert!(is_non_facility_pos("11"));
        assert!(is_non_facility_pos("21"));
        assert!(!is_non_facility_pos("22"));
        assert!(!is_non_facility_pos("02"));
        assert!(!is_non_facility_pos("garbage"));
    }
}
