//! Beneficiary cost-sharing parameters

use super::money::Cents;
use serde::{Deserialize, Serialize};

/// Benefit parameters for a valuation year.
///
/// Backed by the `benefit_params` table; the defaults below apply when no
/// row exists for the year.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenefitParams {
    pub year: i32,

    /// Part B annual deductible still owed at the start of the plan
    pub part_b_deductible_cents: Cents,

    /// Part B coinsurance rate
    pub part_b_coinsurance_rate: f64,

    /// Part A per-admission inpatient deductible
    pub part_a_deductible_cents: Cents,
}

impl BenefitParams {
    /// Compiled-in defaults used when the `benefit_params` table has no
    /// row for the valuation year: Part B deductible treated as already
    /// met, 20% coinsurance, $1,600 Part A admission deductible.
    pub fn defaults_for(year: i32) -> Self {
        Self {
            year,
            part_b_deductible_cents: 0,
            part_b_coinsurance_rate: 0.20,
            part_a_deductible_cents: 160_000,
        }
    }
}
