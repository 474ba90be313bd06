//! Geography endpoints

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ApiError, AppState};
use crate::resolver::ResolveRequest;
use crate::snapshot::SelectionMode;

#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    pub zip: String,
    pub plus4: Option<String>,
    pub valuation_year: Option<i32>,
    pub quarter: Option<u8>,
    pub valuation_date: Option<NaiveDate>,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub expose_carrier: bool,
    pub initial_radius_miles: Option<f64>,
    pub expand_step_miles: Option<f64>,
    pub max_radius_miles: Option<f64>,
}

pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResolveQuery>,
) -> Result<Response, ApiError> {
    let resolution = state
        .resolver
        .resolve(&ResolveRequest {
            zip: query.zip,
            plus4: query.plus4,
            valuation_year: query.valuation_year,
            quarter: query.quarter,
            valuation_date: query.valuation_date,
            strict: query.strict,
            expose_carrier: query.expose_carrier,
            initial_radius_miles: query.initial_radius_miles,
            expand_step_miles: query.expand_step_miles,
            max_radius_miles: query.max_radius_miles,
        })
        .await?;
    Ok(Json(resolution).into_response())
}

#[derive(Debug, Serialize)]
struct ActiveSnapshot {
    dataset_id: String,
    dataset_digest: String,
    effective_from: Option<String>,
    effective_to: Option<String>,
}

#[derive(Debug, Serialize)]
struct PerfSlo {
    p95_warm_ms: u32,
    p95_cold_ms: u32,
}

#[derive(Debug, Serialize)]
struct BuildInfo {
    version: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    build: BuildInfo,
    active_snapshot: ActiveSnapshot,
    perf_slo: PerfSlo,
    uptime_seconds: u64,
}

/// Health check: `ok`/`degraded` answer 200, `error` answers 503.
pub async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    let uptime_seconds = state.started_at.elapsed().as_secs();
    let today = Utc::now().date_naive();

    let (status, active_snapshot) = match state
        .registry
        .select_at("GEOGRAPHY", today, SelectionMode::Strict)
        .await
    {
        Ok(snapshot) => (
            "ok",
            ActiveSnapshot {
                dataset_id: snapshot.dataset_id,
                dataset_digest: snapshot.digest,
                effective_from: Some(snapshot.effective_from.to_string()),
                effective_to: snapshot.effective_to.map(|d| d.to_string()),
            },
        ),
        Err(crate::snapshot::RegistryError::NoSnapshot { .. }) => {
            // A stale snapshot still serves, but the service is degraded
            match state
                .registry
                .select_at("GEOGRAPHY", today, SelectionMode::LatestBefore)
                .await
            {
                Ok(snapshot) => (
                    "degraded",
                    ActiveSnapshot {
                        dataset_id: snapshot.dataset_id,
                        dataset_digest: snapshot.digest,
                        effective_from: Some(snapshot.effective_from.to_string()),
                        effective_to: snapshot.effective_to.map(|d| d.to_string()),
                    },
                ),
                Err(_) => (
                    "error",
                    ActiveSnapshot {
                        dataset_id: "GEOGRAPHY".to_string(),
                        dataset_digest: "none".to_string(),
                        effective_from: None,
                        effective_to: None,
                    },
                ),
            }
        }
        Err(_) => (
            "error",
            ActiveSnapshot {
                dataset_id: "GEOGRAPHY".to_string(),
                dataset_digest: "none".to_string(),
                effective_from: None,
                effective_to: None,
            },
        ),
    };

    let body = HealthResponse {
        status: status.to_string(),
        build: BuildInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        active_snapshot,
        perf_slo: PerfSlo {
            p95_warm_ms: 2,
            p95_cold_ms: 20,
        },
        uptime_seconds,
    };

    let code = if status == "error" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub zip: Option<String>,
}

/// Resolution trace summary statistics.
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<Response, ApiError> {
    let stats = state
        .trace
        .resolution_summary(query.zip.as_deref())
        .await?;
    Ok(Json(stats).into_response())
}
