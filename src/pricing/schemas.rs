//! Request and response shapes for the pricing orchestrator

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engines::{LineResult, PricingError, UnitConversion};
use crate::types::{
    AdHocPlan, Cents, MatchLevel, MoneyFormat, PlanComponent, RateSource, Resolution, RuralFlag,
    Setting,
};

fn default_sequestration_rate() -> f64 {
    0.02
}

/// Request to price a plan against one location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRequest {
    /// 5-digit ZIP code
    pub zip: String,

    /// Stored plan to price
    #[serde(default)]
    pub plan_id: Option<Uuid>,

    /// Inline plan, used when no `plan_id` is given
    #[serde(default)]
    pub ad_hoc_plan: Option<AdHocPlan>,

    pub year: i32,
    #[serde(default)]
    pub quarter: Option<u8>,
    #[serde(default)]
    pub valuation_date: Option<NaiveDate>,

    /// CMS Certification Number filter
    #[serde(default)]
    pub ccn: Option<String>,

    #[serde(default)]
    pub payer: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,

    #[serde(default)]
    pub include_home_health: bool,
    #[serde(default)]
    pub include_snf: bool,
    #[serde(default)]
    pub apply_sequestration: bool,
    #[serde(default = "default_sequestration_rate")]
    pub sequestration_rate: f64,

    #[serde(default)]
    pub format: MoneyFormat,

    /// Fail the run on the first line or resolution failure
    #[serde(default)]
    pub strict: bool,
}

impl PricingRequest {
    /// Validate the envelope-level constraints.
    pub fn validate(&self) -> Result<(), PricingError> {
        if self.zip.chars().filter(|c| c.is_ascii_digit()).count() < 5 {
            return Err(PricingError::InvalidInput(format!(
                "zip must contain at least 5 digits, got {:?}",
                self.zip
            )));
        }
        if !(2020..=2030).contains(&self.year) {
            return Err(PricingError::InvalidInput(format!(
                "year must be between 2020 and 2030, got {}",
                self.year
            )));
        }
        if let Some(q) = self.quarter {
            if !(1..=4).contains(&q) {
                return Err(PricingError::InvalidInput(format!(
                    "quarter must be 1-4, got {}",
                    q
                )));
            }
        }
        if let Some(ccn) = &self.ccn {
            if ccn.len() != 6 || !ccn.chars().all(|c| c.is_ascii_digit()) {
                return Err(PricingError::InvalidInput(format!(
                    "ccn must be exactly 6 digits, got {:?}",
                    ccn
                )));
            }
        }
        if !(0.0..=0.1).contains(&self.sequestration_rate) {
            return Err(PricingError::InvalidInput(format!(
                "sequestration_rate must be within [0, 0.1], got {}",
                self.sequestration_rate
            )));
        }
        if self.plan_id.is_none() && self.ad_hoc_plan.is_none() {
            return Err(PricingError::InvalidInput(
                "either plan_id or ad_hoc_plan is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Request to compare a plan across two locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRequest {
    pub zip_a: String,
    pub zip_b: String,
    #[serde(default)]
    pub ccn_a: Option<String>,
    #[serde(default)]
    pub ccn_b: Option<String>,

    #[serde(default)]
    pub plan_id: Option<Uuid>,
    #[serde(default)]
    pub ad_hoc_plan: Option<AdHocPlan>,

    pub year: i32,
    #[serde(default)]
    pub quarter: Option<u8>,
    #[serde(default)]
    pub valuation_date: Option<NaiveDate>,

    #[serde(default)]
    pub payer: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,

    #[serde(default)]
    pub include_home_health: bool,
    #[serde(default)]
    pub include_snf: bool,
    #[serde(default)]
    pub apply_sequestration: bool,
    #[serde(default = "default_sequestration_rate")]
    pub sequestration_rate: f64,

    #[serde(default)]
    pub format: MoneyFormat,
    #[serde(default)]
    pub strict: bool,
}

impl ComparisonRequest {
    /// Per-side pricing request. Both sides share every toggle, so toggle
    /// parity holds by construction; the parity check still verifies it.
    pub fn side(&self, zip: &str, ccn: Option<&String>) -> PricingRequest {
        PricingRequest {
            zip: zip.to_string(),
            plan_id: self.plan_id,
            ad_hoc_plan: self.ad_hoc_plan.clone(),
            year: self.year,
            quarter: self.quarter,
            valuation_date: self.valuation_date,
            ccn: ccn.cloned(),
            payer: self.payer.clone(),
            plan: self.plan.clone(),
            include_home_health: self.include_home_health,
            include_snf: self.include_snf,
            apply_sequestration: self.apply_sequestration,
            sequestration_rate: self.sequestration_rate,
            format: self.format,
            strict: self.strict,
        }
    }
}

/// Whether a line priced or failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    Priced,
    Failed,
}

/// Failure detail for a failed line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineError {
    pub code: String,
    pub message: String,
}

/// One line of a pricing response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub sequence: i32,
    pub code: String,
    pub setting: Setting,
    pub units: f64,
    pub utilization_weight: f64,
    pub status: LineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LineError>,

    pub allowed_cents: Cents,
    pub beneficiary_deductible_cents: Cents,
    pub beneficiary_coinsurance_cents: Cents,
    pub beneficiary_total_cents: Cents,
    pub program_payment_cents: Cents,
    pub professional_allowed_cents: Cents,
    pub facility_allowed_cents: Cents,

    pub source: RateSource,
    pub facility_specific: bool,
    pub packaged: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_price_cents: Option<Cents>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_conversion: Option<UnitConversion>,

    pub trace_refs: Vec<String>,
    pub dataset_digests: Vec<String>,
}

impl LineItem {
    pub fn priced(component: &PlanComponent, result: &LineResult) -> Self {
        Self {
            sequence: component.sequence,
            code: component.code.clone(),
            setting: component.setting,
            units: component.units,
            utilization_weight: component.utilization_weight,
            status: LineStatus::Priced,
            error: None,
            allowed_cents: result.allowed_cents,
            beneficiary_deductible_cents: result.beneficiary_deductible_cents,
            beneficiary_coinsurance_cents: result.beneficiary_coinsurance_cents,
            beneficiary_total_cents: result.beneficiary_total_cents,
            program_payment_cents: result.program_payment_cents,
            professional_allowed_cents: result.professional_allowed_cents,
            facility_allowed_cents: result.facility_allowed_cents,
            source: result.source,
            facility_specific: result.facility_specific,
            packaged: result.packaged,
            reference_price_cents: result.reference_price_cents,
            unit_conversion: result.unit_conversion.clone(),
            trace_refs: result.trace_refs.clone(),
            dataset_digests: result.dataset_digests.clone(),
        }
    }

    pub fn failed(component: &PlanComponent, error: &PricingError) -> Self {
        Self {
            sequence: component.sequence,
            code: component.code.clone(),
            setting: component.setting,
            units: component.units,
            utilization_weight: component.utilization_weight,
            status: LineStatus::Failed,
            error: Some(LineError {
                code: error.code().to_string(),
                message: error.to_string(),
            }),
            allowed_cents: 0,
            beneficiary_deductible_cents: 0,
            beneficiary_coinsurance_cents: 0,
            beneficiary_total_cents: 0,
            program_payment_cents: 0,
            professional_allowed_cents: 0,
            facility_allowed_cents: 0,
            source: RateSource::Benchmark,
            facility_specific: false,
            packaged: false,
            reference_price_cents: None,
            unit_conversion: None,
            trace_refs: Vec::new(),
            dataset_digests: Vec::new(),
        }
    }
}

/// Geography block of a pricing response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeographySummary {
    pub zip5: String,
    pub locality_id: String,
    pub state: Option<String>,
    pub rural_flag: Option<RuralFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    pub cbsa: Option<String>,
    pub match_level: MatchLevel,
    pub dataset_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearest_zip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_miles: Option<f64>,
}

impl GeographySummary {
    pub fn from_resolution(zip5: &str, resolution: &Resolution) -> Self {
        Self {
            zip5: zip5.to_string(),
            locality_id: resolution.locality_id.clone(),
            state: resolution.state.clone(),
            rural_flag: resolution.rural_flag,
            carrier: resolution.carrier.clone(),
            cbsa: resolution.cbsa.clone(),
            match_level: resolution.match_level,
            dataset_digest: resolution.dataset_digest.clone(),
            nearest_zip: resolution.nearest_zip.clone(),
            distance_miles: resolution.distance_miles,
        }
    }
}

/// Summed per-line fields.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Totals {
    pub allowed_cents: Cents,
    pub beneficiary_deductible_cents: Cents,
    pub beneficiary_coinsurance_cents: Cents,
    pub beneficiary_total_cents: Cents,
    pub program_payment_cents: Cents,
}

impl Totals {
    pub fn accumulate(&mut self, line: &LineResult) {
        self.allowed_cents += line.allowed_cents;
        self.beneficiary_deductible_cents += line.beneficiary_deductible_cents;
        self.beneficiary_coinsurance_cents += line.beneficiary_coinsurance_cents;
        self.beneficiary_total_cents += line.beneficiary_total_cents;
        self.program_payment_cents += line.program_payment_cents;
    }
}

/// Response for one priced plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingResponse {
    pub run_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<Uuid>,
    pub plan_name: String,
    pub geography: GeographySummary,
    pub line_items: Vec<LineItem>,
    pub totals: Totals,

    /// Part B deductible remaining after the run
    pub remaining_deductible_cents: Cents,

    pub sequestration_applied: bool,

    /// Program-payment reduction when sequestration applies; line and
    /// total payments stay gross so the cents conservation invariant
    /// holds
    pub sequestration_reduction_cents: Cents,

    pub datasets_used: Vec<String>,
    pub warnings: Vec<String>,
}

/// Response for one priced code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodePriceResponse {
    pub run_id: Uuid,
    pub geography: GeographySummary,
    pub line: LineItem,
    pub datasets_used: Vec<String>,
    pub warnings: Vec<String>,
}

/// A parity rule the comparison violated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ParityViolation {
    /// The dataset digest sets of the two sides differ
    DatasetDigestDiffer,

    /// Policy toggles differ between the two sides
    TogglesDiffer,

    /// Plan ids differ between the two sides
    PlanDiffer,
}

/// Parity report attached to comparison responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParityReport {
    pub valid: bool,
    pub violations: Vec<ParityViolation>,
    pub snapshots_match: bool,
    pub toggles_match: bool,
    pub plan_match: bool,
}

/// One per-field delta between the two sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonDelta {
    pub field: String,
    pub location_a: Cents,
    pub location_b: Cents,
    pub delta_cents: Cents,

    /// Percent change from A to B; absent when A is zero and B is not
    pub delta_percent: Option<f64>,
}

/// Percent change from `a` to `b`.
pub fn percentage_delta(a: Cents, b: Cents) -> Option<f64> {
    if a == 0 {
        if b == 0 {
            Some(0.0)
        } else {
            None
        }
    } else {
        Some((b - a) as f64 / a as f64 * 100.0)
    }
}

/// Response for a two-location comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResponse {
    pub run_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<Uuid>,
    pub plan_name: String,
    pub location_a: PricingResponse,
    pub location_b: PricingResponse,
    pub deltas: Vec<ComparisonDelta>,
    pub parity: ParityReport,
    pub total_delta_cents: Cents,
    pub total_delta_percent: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_request() -> PricingRequest {
        serde_json::from_value(serde_json::json!({
            "zip": "94110",
            "year": 2025,
            "ad_hoc_plan": {"components": []}
        }))
        .unwrap()
    }

    #[test]
    fn test_request_defaults() {
        let request = minimal_request();
        assert!(!request.apply_sequestration);
        assert_eq!(request.sequestration_rate, 0.02);
        assert_eq!(request.format, MoneyFormat::Cents);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_validation() {
        let mut request = minimal_request();
        request.year = 2035;
        assert!(request.validate().is_err());

        let mut request = minimal_request();
        request.ccn = Some("12345".to_string());
        assert!(request.validate().is_err());
        request.ccn = Some("123456".to_string());
        assert!(request.validate().is_ok());

        let mut request = minimal_request();
        request.sequestration_rate = 0.5;
        assert!(request.validate().is_err());

        let mut request = minimal_request();
        request.ad_hoc_plan = None;
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_percentage_delta_edges() {
        assert_eq!(percentage_delta(0, 0), Some(0.0));
        assert_eq!(percentage_delta(0, 100), None);
        assert_eq!(percentage_delta(100, 150), Some(50.0));
        assert_eq!(percentage_delta(200, 100), Some(-50.0));
    }
}
