//! Treatment plans and their billable components

use super::common::Setting;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored treatment plan: an ordered sequence of billable components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,

    /// Components ordered by `sequence`, then insertion order
    pub components: Vec<PlanComponent>,
}

/// One billable line of a treatment plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanComponent {
    /// Order within the plan
    pub sequence: i32,

    /// HCPCS/CPT code (or DRG for inpatient lines)
    pub code: String,

    /// Fee-schedule setting that prices this line
    pub setting: Setting,

    pub units: f64,

    /// Expected utilization multiplier
    pub utilization_weight: f64,

    pub professional_component: bool,
    pub facility_component: bool,

    /// Ordered billing modifiers, normalized to uppercase
    pub modifiers: Vec<String>,

    /// Place-of-service code
    pub pos: Option<String>,

    /// 11-digit NDC for drug lines
    pub ndc11: Option<String>,

    /// Discarded drug units (reserved)
    pub wastage_units: f64,
}

impl PlanComponent {
    /// A minimal component with defaults matching stored-plan semantics.
    pub fn new(sequence: i32, code: impl Into<String>, setting: Setting) -> Self {
        Self {
            sequence,
            code: code.into(),
            setting,
            units: 1.0,
            utilization_weight: 1.0,
            professional_component: true,
            facility_component: true,
            modifiers: Vec::new(),
            pos: None,
            ndc11: None,
            wastage_units: 0.0,
        }
    }
}

/// Ad-hoc plan payload accepted in place of a stored plan id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdHocPlan {
    pub name: Option<String>,
    #[serde(default)]
    pub components: Vec<AdHocComponent>,
}

/// Loosely-typed component from an ad-hoc plan payload.
///
/// Missing fields take the stored-plan defaults; `normalize` produces the
/// same shape stored plans load into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdHocComponent {
    pub code: String,
    pub setting: Setting,
    pub sequence: Option<i32>,
    pub units: Option<f64>,
    pub utilization_weight: Option<f64>,
    pub professional_component: Option<bool>,
    pub facility_component: Option<bool>,
    #[serde(default)]
    pub modifiers: Vec<String>,
    pub pos: Option<String>,
    pub ndc11: Option<String>,
    pub wastage_units: Option<f64>,
}

impl AdHocComponent {
    /// Apply defaults and normalization, falling back to the given
    /// sequence when none was provided.
    pub fn normalize(&self, fallback_sequence: i32) -> PlanComponent {
        PlanComponent {
            sequence: self.sequence.unwrap_or(fallback_sequence),
            code: self.code.trim().to_string(),
            setting: self.setting,
            units: self.units.unwrap_or(1.0),
            utilization_weight: self.utilization_weight.unwrap_or(1.0),
            professional_component: self.professional_component.unwrap_or(true),
            facility_component: self.facility_component.unwrap_or(true),
            modifiers: self
                .modifiers
                .iter()
                .map(|m| m.trim().to_ascii_uppercase())
                .filter(|m| !m.is_empty())
                .collect(),
            pos: self.pos.as_ref().map(|p| p.trim().to_string()),
            ndc11: self.ndc11.as_ref().map(|n| n.trim().to_string()),
            wastage_units: self.wastage_units.unwrap_or(0.0),
        }
    }
}
