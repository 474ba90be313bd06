//! HTTP error envelope
//!
//! Every failure leaves the service as `{error, code, trace_id}` with a
//! status drawn from the error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::AuthError;
use crate::engines::PricingError;
use crate::resolver::ResolverError;
use crate::snapshot::RegistryError;
use crate::store::StoreError;

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: String,
    code: String,
    trace_id: Option<Uuid>,
}

/// API-level error with envelope data.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub trace_id: Option<Uuid>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            trace_id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: self.message,
            code: self.code,
            trace_id: self.trace_id,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let status = match err {
            AuthError::Missing | AuthError::Invalid => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
        };
        ApiError::new(status, err.code(), err.to_string())
    }
}

impl From<ResolverError> for ApiError {
    fn from(err: ResolverError) -> Self {
        let status = match err {
            ResolverError::InvalidZip { .. }
            | ResolverError::NeedsPlus4 { .. }
            | ResolverError::NoCoverage { .. }
            | ResolverError::InvalidPeriod(_) => StatusCode::BAD_REQUEST,
            ResolverError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.code(), err.to_string())
    }
}

impl From<PricingError> for ApiError {
    fn from(err: PricingError) -> Self {
        let status = match &err {
            PricingError::InvalidInput(_)
            | PricingError::SchedulePricingMiss { .. }
            | PricingError::RequiredReferenceMiss { .. } => StatusCode::BAD_REQUEST,
            PricingError::Resolver(inner) => return ApiError::from_resolver_ref(inner),
            PricingError::PlanNotFound(_) | PricingError::RunNotFound(_) => StatusCode::NOT_FOUND,
            PricingError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            PricingError::Store(_) | PricingError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError::new(status, err.code(), err.to_string())
    }
}

impl ApiError {
    fn from_resolver_ref(err: &ResolverError) -> Self {
        let status = match err {
            ResolverError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, err.code(), err.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = match err {
            RegistryError::NoSnapshot { .. }
            | RegistryError::UnknownDigest(_)
            | RegistryError::UnknownPin(_) => StatusCode::NOT_FOUND,
            RegistryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = match err {
            RegistryError::NoSnapshot { .. } => "SNAPSHOT_NOT_FOUND",
            RegistryError::UnknownDigest(_) => "SNAPSHOT_UNKNOWN_DIGEST",
            RegistryError::UnknownPin(_) => "SNAPSHOT_UNKNOWN_PIN",
            RegistryError::Store(_) => "SNAPSHOT_STORE_ERROR",
        };
        ApiError::new(status, code, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "STORE_ERROR",
            err.to_string(),
        )
    }
}
