//! Pricing endpoints

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use super::{ApiError, AppState};
use crate::pricing::{
    CodePriceParams, CodePriceResponse, ComparisonRequest, ComparisonResponse, PricingRequest,
    PricingResponse,
};
use crate::types::Setting;

#[derive(Debug, Deserialize)]
pub struct CodePriceQuery {
    pub zip: String,
    pub code: String,
    pub setting: String,
    pub year: i32,
    pub quarter: Option<u8>,
    pub ccn: Option<String>,
    pub payer: Option<String>,
    pub plan: Option<String>,
}

pub async fn price_code(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CodePriceQuery>,
) -> Result<Json<CodePriceResponse>, ApiError> {
    if query.code.is_empty() || query.code.len() > 5 {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "PRICING_INVALID_INPUT",
            format!("code must be 1-5 characters, got {:?}", query.code),
        ));
    }
    let setting: Setting = query.setting.parse().map_err(|message: String| {
        ApiError::new(StatusCode::BAD_REQUEST, "PRICING_INVALID_INPUT", message)
    })?;

    let response = state
        .pricing
        .price_single_code(CodePriceParams {
            zip: query.zip,
            code: query.code,
            setting,
            year: query.year,
            quarter: query.quarter,
            ccn: query.ccn,
            payer: query.payer,
            plan: query.plan,
        })
        .await?;
    Ok(Json(response))
}

pub async fn price_plan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PricingRequest>,
) -> Result<Json<PricingResponse>, ApiError> {
    let response = state.pricing.price_plan(request).await?;
    Ok(Json(response))
}

pub async fn compare(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ComparisonRequest>,
) -> Result<Json<ComparisonResponse>, ApiError> {
    let response = state.pricing.compare(request).await?;
    Ok(Json(response))
}
