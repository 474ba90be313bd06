//! Pricing engines for the seven fee-schedule settings
//!
//! Every engine implements the same operation: given the resolved
//! geography, the valuation period, benefit parameters, and one plan
//! component, produce a line result in integer cents. Dispatch is a table
//! keyed by [`Setting`] rather than a class hierarchy.
//!
//! Shared subroutines live here: modifier adjustment (applied in modifier
//! order, in cents, with banker's rounding) and beneficiary cost sharing
//! (deductible then coinsurance, threading the remaining deductible back
//! to the orchestrator).

mod asc;
mod clfs;
mod dmepos;
mod drugs;
mod ipps;
mod mpfs;
mod opps;

pub use asc::AscEngine;
pub use clfs::ClfsEngine;
pub use dmepos::DmeposEngine;
pub use drugs::DrugEngine;
pub use ipps::IppsEngine;
pub use mpfs::MpfsEngine;
pub use opps::OppsEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::cache::CacheManager;
use crate::resolver::ResolverError;
use crate::store::{PricingStore, StoreError};
use crate::types::{
    round_cents, scale_cents, BenefitParams, Cents, PlanComponent, RateSource, Resolution,
    Setting, ValuationPeriod,
};

/// Error type for pricing operations
#[derive(Debug, Error)]
pub enum PricingError {
    /// Missing fee-schedule row for the requested code and window
    #[error("no {setting} schedule row for code {code} in the valuation window")]
    SchedulePricingMiss { setting: Setting, code: String },

    /// Missing GPCI/conversion-factor/wage-index/DRG reference data
    #[error("missing required reference data: {what}")]
    RequiredReferenceMiss { what: String },

    /// Request validation failure
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Referenced stored plan does not exist
    #[error("plan not found: {0}")]
    PlanNotFound(uuid::Uuid),

    /// Resolution failure surfaced through pricing
    #[error(transparent)]
    Resolver(#[from] ResolverError),

    /// Store failure
    #[error("pricing store failure: {0}")]
    Store(#[from] StoreError),

    /// The run exceeded its request deadline
    #[error("pricing run exceeded the request deadline")]
    Timeout,

    /// Run to replay does not exist
    #[error("run not found: {0}")]
    RunNotFound(uuid::Uuid),

    /// Unexpected failure
    #[error("internal pricing error: {0}")]
    Internal(String),
}

impl PricingError {
    /// Stable error code for the HTTP envelope.
    pub fn code(&self) -> &'static str {
        match self {
            PricingError::SchedulePricingMiss { .. } => "PRICING_SCHEDULE_MISS",
            PricingError::RequiredReferenceMiss { .. } => "PRICING_REFERENCE_MISS",
            PricingError::InvalidInput(_) => "PRICING_INVALID_INPUT",
            PricingError::PlanNotFound(_) => "PRICING_PLAN_NOT_FOUND",
            PricingError::Resolver(err) => err.code(),
            PricingError::Store(_) => "PRICING_STORE_ERROR",
            PricingError::Timeout => "PRICING_TIMEOUT",
            PricingError::RunNotFound(_) => "TRACE_RUN_NOT_FOUND",
            PricingError::Internal(_) => "PRICING_INTERNAL",
        }
    }

    /// Line-local failures fail the line; the run continues unless the
    /// request was strict.
    pub fn is_line_local(&self) -> bool {
        matches!(
            self,
            PricingError::SchedulePricingMiss { .. } | PricingError::RequiredReferenceMiss { .. }
        )
    }
}

/// Result type for pricing operations
pub type PricingResult<T> = Result<T, PricingError>;

/// Context shared by every line of a run.
#[derive(Debug, Clone)]
pub struct PricingContext {
    pub resolution: Resolution,
    pub period: ValuationPeriod,
    pub benefits: BenefitParams,

    /// Part B deductible still owed entering this line; the orchestrator
    /// threads the updated value through subsequent lines
    pub deductible_remaining_cents: Cents,
}

/// NDC-to-HCPCS unit conversion detail attached to drug lines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitConversion {
    pub ndc11: String,
    pub hcpcs: String,
    pub units_per_hcpcs: f64,
    pub nadac_unit_price_cents: Cents,
    pub nadac_as_of: chrono::NaiveDate,
}

/// One modifier as it was applied (or recorded and passed through).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModifierApplication {
    pub modifier: String,

    /// Multiplier for recognized modifiers; `None` for pass-throughs
    pub factor: Option<f64>,
}

/// Priced line in integer cents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineResult {
    pub allowed_cents: Cents,
    pub beneficiary_deductible_cents: Cents,
    pub beneficiary_coinsurance_cents: Cents,
    pub beneficiary_total_cents: Cents,
    pub program_payment_cents: Cents,
    pub professional_allowed_cents: Cents,
    pub facility_allowed_cents: Cents,
    pub packaged: bool,
    pub facility_specific: bool,
    pub source: RateSource,

    /// NADAC reference price for drug lines
    pub reference_price_cents: Option<Cents>,
    pub unit_conversion: Option<UnitConversion>,

    /// References to the schedule rows this line consulted
    pub trace_refs: Vec<String>,

    /// Dataset digests of the rows this line consulted
    pub dataset_digests: Vec<String>,

    /// Modifiers in application order
    pub modifiers_applied: Vec<ModifierApplication>,

    /// Non-fatal notes (NADAC miss, PO-Box fallback, ...)
    pub notes: Vec<String>,

    /// Part B deductible remaining after this line
    pub deductible_remaining_cents: Cents,
}

impl LineResult {
    /// A zero-amount line used for packaged items.
    pub fn packaged_zero(ctx: &PricingContext) -> Self {
        Self {
            allowed_cents: 0,
            beneficiary_deductible_cents: 0,
            beneficiary_coinsurance_cents: 0,
            beneficiary_total_cents: 0,
            program_payment_cents: 0,
            professional_allowed_cents: 0,
            facility_allowed_cents: 0,
            packaged: true,
            facility_specific: false,
            source: RateSource::Benchmark,
            reference_price_cents: None,
            unit_conversion: None,
            trace_refs: Vec::new(),
            dataset_digests: Vec::new(),
            modifiers_applied: Vec::new(),
            notes: Vec::new(),
            deductible_remaining_cents: ctx.deductible_remaining_cents,
        }
    }
}

/// Beneficiary cost-sharing split for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostSharing {
    pub deductible_cents: Cents,
    pub coinsurance_cents: Cents,
    pub beneficiary_total_cents: Cents,
    pub program_payment_cents: Cents,
    pub remaining_after_cents: Cents,
}

/// Standard Part B cost sharing: deductible first, then coinsurance on
/// the remainder.
pub fn cost_sharing(
    allowed_cents: Cents,
    deductible_remaining_cents: Cents,
    coinsurance_rate: f64,
) -> CostSharing {
    let deductible = deductible_remaining_cents.min(allowed_cents).max(0);
    let coinsurance = round_cents((allowed_cents - deductible) as f64 * coinsurance_rate);
    let beneficiary_total = deductible + coinsurance;
    CostSharing {
        deductible_cents: deductible,
        coinsurance_cents: coinsurance,
        beneficiary_total_cents: beneficiary_total,
        program_payment_cents: allowed_cents - beneficiary_total,
        remaining_after_cents: deductible_remaining_cents - deductible,
    }
}

/// Apply billing modifiers in order, in cents with banker's rounding.
///
/// `-50` (bilateral) multiplies by 1.5 and `-51` (multiple procedures)
/// by 0.5. Unknown modifiers pass through unchanged but are recorded so
/// an auditor can see they were present.
pub fn apply_modifiers(cents: Cents, modifiers: &[String]) -> (Cents, Vec<ModifierApplication>) {
    let mut amount = cents;
    let mut applied = Vec::with_capacity(modifiers.len());
    for modifier in modifiers {
        let factor = match modifier.trim_start_matches('-') {
            "50" => Some(1.5),
            "51" => Some(0.5),
            _ => None,
        };
        if let Some(factor) = factor {
            amount = scale_cents(amount, factor);
        }
        applied.push(ModifierApplication {
            modifier: modifier.clone(),
            factor,
        });
    }
    (amount, applied)
}

/// Scale a per-unit amount by the component's units and utilization
/// weight.
pub fn apply_quantity(cents: Cents, component: &PlanComponent) -> Cents {
    scale_cents(cents, component.units * component.utilization_weight)
}

/// A pricing engine for one fee-schedule setting.
#[async_trait]
pub trait PricingEngine: Send + Sync {
    /// The setting this engine prices.
    fn setting(&self) -> Setting;

    /// Price one plan component.
    async fn price(
        &self,
        ctx: &PricingContext,
        component: &PlanComponent,
    ) -> PricingResult<LineResult>;
}

/// Build the dispatch table mapping each setting to its engine.
pub fn engine_table(
    store: Arc<dyn PricingStore>,
    cache: Arc<CacheManager>,
) -> HashMap<Setting, Arc<dyn PricingEngine>> {
    let mut table: HashMap<Setting, Arc<dyn PricingEngine>> = HashMap::new();
    table.insert(
        Setting::Mpfs,
        Arc::new(MpfsEngine::new(store.clone(), cache.clone())),
    );
    table.insert(
        Setting::Opps,
        Arc::new(OppsEngine::new(store.clone(), cache.clone())),
    );
    table.insert(
        Setting::Asc,
        Arc::new(AscEngine::new(store.clone(), cache.clone())),
    );
    table.insert(
        Setting::Ipps,
        Arc::new(IppsEngine::new(store.clone(), cache.clone())),
    );
    table.insert(
        Setting::Clfs,
        Arc::new(ClfsEngine::new(store.clone(), cache.clone())),
    );
    table.insert(
        Setting::Dmepos,
        Arc::new(DmeposEngine::new(store.clone(), cache.clone())),
    );
    table.insert(Setting::Drug, Arc::new(DrugEngine::new(store, cache)));
    table
}
