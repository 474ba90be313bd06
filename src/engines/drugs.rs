//! Part B drug engine: ASP plus the 6% add-on, with an optional NADAC
//! reference price
//!
//! `allowed = ASP × 1.06 × units × utilization`, then modifiers, then
//! cost sharing. When the component carries an NDC, the latest NADAC row
//! and the NDC-to-HCPCS crosswalk produce a reference price and a
//! unit-conversion trace payload; a NADAC or crosswalk miss is recorded
//! as a note and never fails the line.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{
    apply_modifiers, cost_sharing, LineResult, PricingContext, PricingEngine, PricingError,
    PricingResult, UnitConversion,
};
use crate::cache::CacheManager;
use crate::store::{PricingStore, ScheduleStore};
use crate::types::{round_cents, PlanComponent, RateSource, Setting};

/// Part B drug payment add-on over ASP.
const ASP_MARKUP: f64 = 1.06;

pub struct DrugEngine {
    store: Arc<dyn PricingStore>,
    cache: Arc<CacheManager>,
}

impl DrugEngine {
    pub fn new(store: Arc<dyn PricingStore>, cache: Arc<CacheManager>) -> Self {
        Self { store, cache }
    }
}

#[async_trait]
impl PricingEngine for DrugEngine {
    fn setting(&self) -> Setting {
        Setting::Drug
    }

    async fn price(
        &self,
        ctx: &PricingContext,
        component: &PlanComponent,
    ) -> PricingResult<LineResult> {
        let year = ctx.period.year;
        let quarter = ctx.period.quarter_or_default();
        let code = component.code.clone();

        let asp_key = format!("asp:{}:{}:{}", year, quarter, code);
        let asp = self
            .cache
            .get_or_compute(&asp_key, None, || {
                self.store.drug_asp_row(year, quarter, &code)
            })
            .await?
            .ok_or_else(|| PricingError::SchedulePricingMiss {
                setting: Setting::Drug,
                code: code.clone(),
            })?;

        let quantity = component.units * component.utilization_weight;
        let base_cents =
            round_cents(asp.asp_per_unit_cents as f64 * ASP_MARKUP * quantity);
        let (allowed_cents, modifiers_applied) =
            apply_modifiers(base_cents, &component.modifiers);

        let sharing = cost_sharing(
            allowed_cents,
            ctx.deductible_remaining_cents,
            ctx.benefits.part_b_coinsurance_rate,
        );

        let mut trace_refs = vec![format!("asp_{}_{}_{}", year, quarter, code)];
        let mut dataset_digests = vec![asp.dataset_digest.clone()];
        let mut notes = Vec::new();
        let mut reference_price_cents = None;
        let mut unit_conversion = None;

        if let Some(ndc11) = &component.ndc11 {
            match self.reference_price(ndc11, &code, quantity).await? {
                ReferenceLookup::Found {
                    price_cents,
                    conversion,
                    nadac_digest,
                    xwalk_digest,
                } => {
                    trace_refs.push(format!(
                        "nadac_{}_{}",
                        conversion.nadac_as_of, conversion.ndc11
                    ));
                    dataset_digests.push(nadac_digest);
                    dataset_digests.push(xwalk_digest);
                    reference_price_cents = Some(price_cents);
                    unit_conversion = Some(conversion);
                }
                ReferenceLookup::NadacMiss => {
                    notes.push(format!("no NADAC price found for NDC {}", ndc11));
                }
                ReferenceLookup::CrosswalkMiss => {
                    notes.push(format!(
                        "no NDC-to-HCPCS crosswalk for {} -> {}",
                        ndc11, code
                    ));
                }
            }
        }

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
            reference_price_cents,
            unit_conversion,
            trace_refs,
            dataset_digests,
            modifiers_applied,
            notes,
            deductible_remaining_cents: sharing.remaining_after_cents,
        })
    }
}

enum ReferenceLookup {
    Found {
        price_cents: i64,
        conversion: UnitConversion,
        nadac_digest: String,
        xwalk_digest: String,
    },
    NadacMiss,
    CrosswalkMiss,
}

impl DrugEngine {
    /// NADAC reference price: `nadac_unit_price × units_per_hcpcs ×
    /// units × utilization`.
    async fn reference_price(
        &self,
        ndc11: &str,
        hcpcs: &str,
        quantity: f64,
    ) -> PricingResult<ReferenceLookup> {
        let nadac_key = format!("nadac:{}", ndc11);
        let Some(nadac) = self
            .cache
            .get_or_compute(&nadac_key, None, || self.store.latest_nadac(ndc11))
            .await?
        else {
            debug!(ndc11 = ndc11, "NADAC miss");
            return Ok(ReferenceLookup::NadacMiss);
        };

        let xwalk_key = format!("ndc_xwalk:{}:{}", ndc11, hcpcs);
        let Some(xwalk) = self
            .cache
            .get_or_compute(&xwalk_key, None, || self.store.ndc_crosswalk(ndc11, hcpcs))
            .await?
        else {
            debug!(ndc11 = ndc11, hcpcs = hcpcs, "NDC crosswalk miss");
            return Ok(ReferenceLookup::CrosswalkMiss);
        };

        let price_cents = round_cents(
            nadac.unit_price_cents as f64 * xwalk.units_per_hcpcs * quantity,
        );

        Ok(ReferenceLookup::Found {
            price_cents,
            conversion: UnitConversion {
                ndc11: ndc11.to_string(),
                hcpcs: hcpcs.to_string(),
                units_per_hcpcs: xwalk.units_per_hcpcs,
                nadac_unit_price_cents: nadac.unit_price_cents,
                nadac_as_of: nadac.as_of,
            },
            nadac_digest: nadac.dataset_digest,
            xwalk_digest: xwalk.dataset_digest,
        })
    }
}
