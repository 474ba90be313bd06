//! Run records and trace entries for auditable, replayable pricing calls

use super::money::Cents;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal status of a pricing run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// All lines priced
    Success,

    /// The run failed before producing a response
    Error,

    /// Some lines failed but the run completed
    Partial,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Partial => "partial",
        }
    }
}

/// Top-level record of one pricing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,

    /// Endpoint that produced the run, e.g. `/pricing/price`
    pub endpoint: String,

    /// Canonical JSON of the request
    pub request: serde_json::Value,

    /// Canonical JSON of the response; absent for failed runs
    pub response: Option<serde_json::Value>,

    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// One top-level request parameter, flattened for querying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInput {
    pub parameter_name: String,
    pub parameter_value: Option<String>,

    /// JSON type of the parameter: string, number, boolean, object, array
    pub parameter_type: String,
}

/// Flattened per-line output of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub line_sequence: i32,
    pub code: String,
    pub setting: String,
    pub allowed_cents: Cents,
    pub beneficiary_deductible_cents: Cents,
    pub beneficiary_coinsurance_cents: Cents,
    pub beneficiary_total_cents: Cents,
    pub program_payment_cents: Cents,
    pub source: String,
    pub trace_refs: Vec<String>,
    pub dataset_digests: Vec<String>,
}

/// One structured trace entry attached to a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTraceEntry {
    /// Trace kind: `run_summary`, `geo_resolution`, `line_pricing`, ...
    pub kind: String,

    /// Structured payload
    pub payload: serde_json::Value,

    /// Set for line-scoped traces
    pub line_sequence: Option<i32>,
}

/// A run together with all of its child rows, as persisted atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRun {
    pub run: RunRecord,
    pub inputs: Vec<RunInput>,
    pub outputs: Vec<RunOutput>,
    pub traces: Vec<RunTraceEntry>,
}

impl StoredRun {
    /// All distinct dataset digests observed during the run, sorted.
    pub fn dataset_digests(&self) -> Vec<String> {
        let mut digests: Vec<String> = self
            .outputs
            .iter()
            .flat_map(|o| o.dataset_digests.iter().cloned())
            .chain(self.traces.iter().filter_map(|t| {
                t.payload
                    .get("dataset_digest")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            }))
            .collect();
        digests.sort();
        digests.dedup();
        digests
    }
}
