//! HTTP surface
//!
//! A thin axum layer over the core services: request parsing, API-key
//! auth with a fixed-window rate limit, and translation of core errors
//! into the `{error, code, trace_id}` envelope. No pricing logic lives
//! here.

mod error;
mod geography;
mod pricing;
mod trace;

pub use error::ApiError;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::info;

use crate::auth::{verify_api_key, ApiKey};
use crate::cache::CacheManager;
use crate::config::Settings;
use crate::pricing::PricingService;
use crate::resolver::GeographyResolver;
use crate::snapshot::SnapshotRegistry;
use crate::store::PricingStore;
use crate::trace::TraceService;

/// Fixed-window per-key request counter.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, (i64, u32)>>,
    limit_per_minute: u32,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limit_per_minute,
        }
    }

    /// Returns false when the key exhausted its window.
    pub fn allow(&self, key: &str) -> bool {
        let minute = Utc::now().timestamp() / 60;
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");
        let entry = windows.entry(key.to_string()).or_insert((minute, 0));
        if entry.0 != minute {
            *entry = (minute, 0);
        }
        entry.1 += 1;
        entry.1 <= self.limit_per_minute
    }
}

/// Shared handler state.
pub struct AppState {
    pub settings: Settings,
    pub store: Arc<dyn PricingStore>,
    pub resolver: Arc<GeographyResolver>,
    pub registry: Arc<SnapshotRegistry>,
    pub pricing: Arc<PricingService>,
    pub trace: Arc<TraceService>,
    pub cache: Arc<CacheManager>,
    pub rate_limiter: RateLimiter,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the full service graph over one store.
    pub fn new(settings: Settings, store: Arc<dyn PricingStore>) -> Arc<Self> {
        let cache = Arc::new(CacheManager::new(settings.cache_config()));
        let resolver = Arc::new(GeographyResolver::new(
            store.clone(),
            settings.resolver_config(),
        ));
        let registry = Arc::new(SnapshotRegistry::new(store.clone()));
        let pricing = Arc::new(PricingService::new(
            store.clone(),
            resolver.clone(),
            cache.clone(),
            settings.request_timeout(),
        ));
        let trace = Arc::new(TraceService::new(store.clone()));
        let rate_limiter = RateLimiter::new(settings.rate_limit_per_minute);

        Arc::new(Self {
            settings,
            store,
            resolver,
            registry,
            pricing,
            trace,
            cache,
            rate_limiter,
            started_at: Instant::now(),
        })
    }
}

/// Build the router with auth and rate limiting applied.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/pricing/codes/price", get(pricing::price_code))
        .route("/pricing/price", post(pricing::price_plan))
        .route("/pricing/compare", post(pricing::compare))
        .route("/geography/resolve", get(geography::resolve))
        .route("/geography/healthz", get(geography::healthz))
        .route("/geography/stats", get(geography::stats))
        .route("/trace/{run_id}", get(trace::get_trace))
        .route("/trace/{run_id}/replay", get(trace::replay))
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .with_state(state)
}

/// Serve until the task is cancelled.
pub async fn serve(state: Arc<AppState>) -> Result<(), std::io::Error> {
    let addr = state.settings.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "pricing API listening");
    axum::serve(listener, router(state)).await
}

/// Verify the API key and enforce the per-key rate limit. Health checks
/// are exempt.
async fn auth_layer(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if request.uri().path() == "/geography/healthz" {
        return Ok(next.run(request).await);
    }

    let header = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    let api_key = verify_api_key(&state.settings, header)?;

    if !state.rate_limiter.allow(&api_key.key) {
        return Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "rate limit exceeded, retry later",
        ));
    }

    request.extensions_mut().insert::<ApiKey>(api_key);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_fixed_window() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
        // Other keys get their own window
        assert!(limiter.allow("other"));
    }
}
