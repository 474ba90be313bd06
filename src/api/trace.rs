//! Trace endpoints

use axum::extract::{Path, State};
use axum::{Extension, Json};
use std::sync::Arc;
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::auth::ApiKey;
use crate::pricing::ReplayReport;
use crate::trace::TraceResponse;

pub async fn get_trace(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<TraceResponse>, ApiError> {
    let trace = state.trace.get_trace(run_id).await?;
    Ok(Json(trace))
}

/// Admin-only: re-execute a run and diff the results.
pub async fn replay(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ReplayReport>, ApiError> {
    api_key.require_admin()?;
    let report = state.pricing.replay(run_id).await?;
    Ok(Json(report))
}
