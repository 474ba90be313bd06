//! Fee-schedule and reference row types for the seven pricing settings
//!
//! Every row carries the `dataset_digest` it was ingested under; engines
//! surface the digests they touched so location comparisons can check
//! snapshot parity against the data that was actually read.

use super::money::Cents;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Physician fee-schedule RVU row for `(year, locality, HCPCS)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MpfsRow {
    pub year: i32,
    pub locality_id: String,
    pub hcpcs: String,
    pub work_rvu: f64,

    /// Practice-expense RVU outside facility settings (office POS)
    pub pe_nonfac_rvu: f64,

    /// Practice-expense RVU in facility settings
    pub pe_fac_rvu: f64,

    pub malp_rvu: f64,
    pub status_code: Option<String>,
    pub global_days: Option<String>,
    pub dataset_digest: String,
}

/// Geographic Practice Cost Index multipliers for `(year, locality)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpciRow {
    pub year: i32,
    pub locality_id: String,
    pub gpci_work: f64,
    pub gpci_pe: f64,
    pub gpci_malp: f64,
    pub dataset_digest: String,
}

/// Which national conversion factor a row carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConversionFactorKind {
    Physician,
    Anesthesia,
}

impl ConversionFactorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionFactorKind::Physician => "physician",
            ConversionFactorKind::Anesthesia => "anesthesia",
        }
    }
}

/// National dollar multiplier applied to the GPCI-weighted RVU sum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionFactor {
    pub year: i32,
    pub kind: ConversionFactorKind,
    pub value: f64,
    pub dataset_digest: String,
}

/// OPPS rate row for `(year, quarter, HCPCS)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OppsRow {
    pub year: i32,
    pub quarter: u8,
    pub hcpcs: String,

    /// OPPS status indicator; packaging indicators suppress payment
    pub status_indicator: String,

    pub apc_code: Option<String>,
    pub national_unadj_rate_cents: Cents,
    pub packaging_flag: bool,
    pub dataset_digest: String,
}

impl OppsRow {
    /// Status indicators whose payment is bundled into another line.
    pub fn is_packaged(&self) -> bool {
        matches!(self.status_indicator.as_str(), "N" | "J1" | "Q1" | "Q2" | "Q3")
    }
}

/// DRG relative-weight row for `(fiscal year, DRG)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrgRow {
    pub fiscal_year: i32,
    pub drg_code: String,
    pub relative_weight: f64,
    pub dataset_digest: String,
}

/// IPPS operating and capital base rates for a fiscal year.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IppsBaseRates {
    pub fiscal_year: i32,
    pub operating_base_cents: Cents,
    pub capital_base_cents: Cents,
    pub dataset_digest: String,
}

/// CBSA wage index.
///
/// OPPS consumes quarterly rows (`quarter = Some(q)`); IPPS consumes the
/// annual row (`quarter = None`). Lookups never mix the two.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WageIndexRow {
    pub year: i32,
    pub quarter: Option<u8>,
    pub cbsa: String,
    pub wage_index: f64,
    pub dataset_digest: String,
}

/// Flat ASC facility rate for `(year, quarter, HCPCS)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AscRow {
    pub year: i32,
    pub quarter: u8,
    pub hcpcs: String,
    pub fee_cents: Cents,
    pub dataset_digest: String,
}

/// Clinical-laboratory fee for `(year, quarter, HCPCS)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClfsRow {
    pub year: i32,
    pub quarter: u8,
    pub hcpcs: String,
    pub fee_cents: Cents,
    pub dataset_digest: String,
}

/// DMEPOS fee for `(year, quarter, code, rural)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DmeposRow {
    pub year: i32,
    pub quarter: u8,
    pub code: String,
    pub rural: bool,
    pub fee_cents: Cents,
    pub dataset_digest: String,
}

/// Average Sales Price row for `(year, quarter, HCPCS)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrugAspRow {
    pub year: i32,
    pub quarter: u8,
    pub hcpcs: String,
    pub asp_per_unit_cents: Cents,
    pub dataset_digest: String,
}

/// National Average Drug Acquisition Cost reference price for an NDC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NadacRow {
    pub as_of: NaiveDate,
    pub ndc11: String,
    pub unit_price_cents: Cents,
    pub unit_type: String,
    pub dataset_digest: String,
}

/// NDC to HCPCS billing-unit crosswalk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NdcCrosswalkRow {
    pub ndc11: String,
    pub hcpcs: String,

    /// NDC billing units per one HCPCS unit
    pub units_per_hcpcs: f64,

    pub dataset_digest: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opps_packaging_indicators() {
        let mut row = OppsRow {
            year: 2025,
            quarter: 1,
            hcpcs: "80053".to_string(),
            status_indicator: "N".to_string(),
            apc_code: None,
            national_unadj_rate_cents: 0,
            packaging_flag: true,
            dataset_digest: "d".to_string(),
        };
        for si in ["N", "J1", "Q1", "Q2", "Q3"] {
            row.status_indicator = si.to_string();
            assert!(row.is_packaged(), "{} should be packaged", si);
        }
        row.status_indicator = "S".to_string();
        assert!(!row.is_packaged());
    }
}
