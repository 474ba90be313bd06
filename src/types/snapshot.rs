//! Dataset snapshots: effective-dated, digest-identified dataset versions

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One append-only snapshot of a dataset.
///
/// Ingestion writes a snapshot per dataset version; serving reads select
/// among them by effective window and never mutate existing rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    /// Dataset identifier: `GEOGRAPHY`, `MPFS`, `OPPS`, ...
    pub dataset_id: String,

    /// Start of the effective window (inclusive)
    pub effective_from: NaiveDate,

    /// End of the effective window (exclusive); `None` = open-ended
    pub effective_to: Option<NaiveDate>,

    /// SHA-256 of the canonical row serialization
    pub digest: String,

    /// Free-form manifest: row counts, source files, ingest notes
    pub manifest: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

/// A named digest pin used by reproducibility tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DigestPin {
    pub pin_name: String,
    pub digest: String,
    pub pinned_at: DateTime<Utc>,
}

/// Outcome of verifying one sample ZIP under a pinned digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproducibilityCheck {
    pub zip5: String,
    pub success: bool,
    pub locality_id: Option<String>,
    pub match_level: Option<String>,
    pub dataset_digest: Option<String>,
    pub digest_match: bool,
    pub error: Option<String>,
}

/// Aggregate reproducibility verification result for a pin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproducibilityReport {
    pub pin_name: String,
    pub pinned_digest: String,

    /// Fraction of successful resolutions whose digest matched the pin
    pub score: f64,

    pub checks: Vec<ReproducibilityCheck>,
    pub verified_at: DateTime<Utc>,
}
