//! Geography entities: ZIP-to-locality rows, ZIP geometry, and resolution
//! results

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// DMEPOS rural indicator attached to a geography row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RuralFlag {
    /// Rural ZIP
    #[serde(rename = "R")]
    Rural,

    /// Super-rural ZIP (frontier)
    #[serde(rename = "B")]
    SuperRural,
}

impl RuralFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuralFlag::Rural => "R",
            RuralFlag::SuperRural => "B",
        }
    }

    /// Parse from the single-character CMS flag; empty/unknown is `None`.
    pub fn parse(s: &str) -> Option<RuralFlag> {
        match s.trim() {
            "R" => Some(RuralFlag::Rural),
            "B" => Some(RuralFlag::SuperRural),
            _ => None,
        }
    }
}

impl fmt::Display for RuralFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One effective-dated ZIP (or ZIP+4) to locality mapping row.
///
/// Rows with `plus4` set (`has_plus4 = true`) take precedence over
/// ZIP5-only rows for the same ZIP during overlapping effective windows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeographyRow {
    /// 5-digit ZIP code, leading zeros preserved
    pub zip5: String,

    /// 4-digit add-on when this is a ZIP+4 row
    pub plus4: Option<String>,

    /// Whether this row keys on the ZIP+4 add-on
    pub has_plus4: bool,

    /// Two-letter state code
    pub state: String,

    /// Physician fee-schedule pricing locality
    pub locality_id: String,

    /// Medicare Administrative Contractor id
    pub carrier_id: Option<String>,

    /// Core-Based Statistical Area for wage adjustment
    pub cbsa: Option<String>,

    /// DMEPOS rural indicator
    pub rural_flag: Option<RuralFlag>,

    /// Start of the effective window (inclusive)
    pub effective_from: NaiveDate,

    /// End of the effective window (exclusive); `None` = open-ended
    pub effective_to: Option<NaiveDate>,

    /// Digest of the dataset version this row was ingested under
    pub dataset_digest: String,
}

/// Representative point for a ZIP, used by the nearest-neighbor fallback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZipGeometry {
    pub zip5: String,
    pub lat: f64,
    pub lon: f64,
    pub state: String,

    /// Whether the ZIP only serves PO boxes
    pub is_pobox: bool,

    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

/// How a resolution was satisfied, in decreasing order of precision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MatchLevel {
    /// Exact ZIP+4 row
    #[serde(rename = "zip+4")]
    ZipPlus4,

    /// Exact ZIP5 row
    #[serde(rename = "zip5")]
    Zip5,

    /// Geodesic nearest in-state ZIP
    #[serde(rename = "nearest")]
    Nearest,

    /// Benchmark locality fallback
    #[serde(rename = "default")]
    Default,

    /// Resolution failed
    #[serde(rename = "error")]
    Error,
}

impl MatchLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchLevel::ZipPlus4 => "zip+4",
            MatchLevel::Zip5 => "zip5",
            MatchLevel::Nearest => "nearest",
            MatchLevel::Default => "default",
            MatchLevel::Error => "error",
        }
    }
}

/// Result of a geographic resolution call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resolution {
    /// Pricing locality
    pub locality_id: String,

    /// State of the matched row; absent for the benchmark fallback
    pub state: Option<String>,

    /// DMEPOS rural indicator of the matched row
    pub rural_flag: Option<RuralFlag>,

    /// Carrier/MAC id, present only when the caller asked for it
    pub carrier: Option<String>,

    /// CBSA of the matched row, for wage-adjusted settings
    pub cbsa: Option<String>,

    /// Which rung of the hierarchy satisfied the call
    pub match_level: MatchLevel,

    /// Dataset digest the matched row was ingested under
    pub dataset_digest: String,

    /// Nearest-neighbor fallback: the candidate ZIP that was used
    pub nearest_zip: Option<String>,

    /// Nearest-neighbor fallback: great-circle distance to the candidate
    pub distance_miles: Option<f64>,

    /// Set when the nearest candidate was a PO-Box ZIP
    pub pobox_fallback: bool,
}

/// Persisted trace row for one resolution call, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionTrace {
    /// Normalized input ZIP5
    pub zip5: String,

    /// Normalized input plus4
    pub plus4: Option<String>,

    /// Request parameters as given
    pub inputs: serde_json::Value,

    pub match_level: MatchLevel,
    pub locality_id: Option<String>,
    pub state: Option<String>,
    pub rural_flag: Option<RuralFlag>,
    pub nearest_zip: Option<String>,
    pub distance_miles: Option<f64>,
    pub dataset_digest: Option<String>,

    /// Wall time of the call in milliseconds
    pub latency_ms: f64,

    /// Resolver build that produced this trace
    pub service_version: String,

    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// Aggregate statistics over stored resolution traces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionStats {
    pub total_calls: u64,
    pub zip4_matches: u64,
    pub zip5_matches: u64,
    pub nearest_matches: u64,
    pub default_matches: u64,
    pub errors: u64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub unique_zips: u64,
    pub unique_states: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rural_flag_parse() {
        assert_eq!(RuralFlag::parse("R"), Some(RuralFlag::Rural));
        assert_eq!(RuralFlag::parse("B"), Some(RuralFlag::SuperRural));
        assert_eq!(RuralFlag::parse(""), None);
        assert_eq!(RuralFlag::parse("X"), None);
    }

    #[test]
    fn test_match_level_serde_names() {
        assert_eq!(
            serde_json::to_string(&MatchLevel::ZipPlus4).unwrap(),
            "\"zip+4\""
        );
        assert_eq!(
            serde_json::from_str::<MatchLevel>("\"nearest\"").unwrap(),
            MatchLevel::Nearest
        );
    }
}
