//! Trace store read path
//!
//! The orchestrator persists runs atomically through the store; this
//! module assembles the full auditable trace for `/trace/{run_id}` and
//! exposes resolution-trace summary statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::engines::{PricingError, PricingResult};
use crate::store::{PricingStore, RunStore, StoreResult};
use crate::types::{ResolutionStats, RunInput, RunOutput, RunStatus, RunTraceEntry};

/// Full trace for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceResponse {
    pub run_id: Uuid,
    pub endpoint: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub request: serde_json::Value,
    pub response: Option<serde_json::Value>,
    pub inputs: Vec<RunInput>,
    pub outputs: Vec<RunOutput>,
    pub traces: Vec<RunTraceEntry>,

    /// Distinct dataset digests observed during the run
    pub datasets_used: Vec<String>,
}

/// Read-side service over the run/trace store.
pub struct TraceService {
    store: Arc<dyn PricingStore>,
}

impl TraceService {
    pub fn new(store: Arc<dyn PricingStore>) -> Self {
        Self { store }
    }

    /// Assemble the full trace for a run.
    pub async fn get_trace(&self, run_id: Uuid) -> PricingResult<TraceResponse> {
        let stored = self
            .store
            .run(run_id)
            .await?
            .ok_or(PricingError::RunNotFound(run_id))?;

        let datasets_used = stored.dataset_digests();
        Ok(TraceResponse {
            run_id: stored.run.run_id,
            endpoint: stored.run.endpoint,
            status: stored.run.status,
            started_at: stored.run.started_at,
            duration_ms: stored.run.duration_ms,
            request: stored.run.request,
            response: stored.run.response,
            inputs: stored.inputs,
            outputs: stored.outputs,
            traces: stored.traces,
            datasets_used,
        })
    }

    /// Aggregate resolution-trace statistics.
    pub async fn resolution_summary(&self, zip5: Option<&str>) -> StoreResult<ResolutionStats> {
        self.store.resolution_stats(zip5).await
    }
}
