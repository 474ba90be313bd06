//! Geographic resolver: ZIP/ZIP+4 to pricing locality
//!
//! Resolution walks a strict precedence hierarchy and stops at the first
//! match:
//!
//! 1. ZIP+4 exact row (when a plus4 was given)
//! 2. strict gate: plus4 given but missed
//! 3. ZIP5 exact row
//! 4. strict gate: ZIP5 missed
//! 5. geodesic nearest in-state ZIP, expanding the search radius
//! 6. configurable benchmark locality
//!
//! Every call, success or failure, persists a structured resolution trace.
//! Trace persistence never fails the call.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use cms_pricer::resolver::{GeographyResolver, ResolveRequest, ResolverConfig};
//! use cms_pricer::store::MemoryStore;
//!
//! # async fn example() -> Result<(), cms_pricer::resolver::ResolverError> {
//! let store = Arc::new(MemoryStore::new());
//! let resolver = GeographyResolver::new(store, ResolverConfig::default());
//!
//! let resolution = resolver
//!     .resolve(&ResolveRequest {
//!         zip: "94110-1234".to_string(),
//!         valuation_year: Some(2025),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("locality {}", resolution.locality_id);
//! # Ok(())
//! # }
//! ```

mod normalize;

pub use normalize::normalize_zip_input;

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{GeographyStore, PricingStore, RunStore, StoreError};
use crate::types::{
    MatchLevel, Resolution, ResolutionTrace, RuralFlag, ValuationPeriod, ZipGeometry,
};

/// Earth radius used by the great-circle distance, in miles.
const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Error type for resolution operations
#[derive(Debug, Error)]
pub enum ResolverError {
    /// Input was not a 5- or 9-digit ZIP
    #[error("invalid ZIP code: {zip}")]
    InvalidZip { zip: String },

    /// Strict mode: a plus4 was given but no ZIP+4 row matched
    #[error(
        "We require a ZIP+4 for precise locality pricing in this area, but couldn't find one \
         for {zip5}-{plus4}. Because strict mode is on, we won't fall back to ZIP5 or nearby \
         ZIPs. You can retry with strict=false to let us use the closest match."
    )]
    NeedsPlus4 { zip5: String, plus4: String },

    /// Strict mode: no ZIP5 row matched and no plus4 was given
    #[error(
        "We couldn't find locality coverage for {zip5} in the requested period. Because strict \
         mode is on, we won't fall back to nearby ZIPs. You can provide a ZIP+4, or retry with \
         strict=false to let us use the closest in-state ZIP."
    )]
    NoCoverage { zip5: String },

    /// Bad valuation parameters
    #[error("invalid valuation period: {0}")]
    InvalidPeriod(String),

    /// Underlying store failure
    #[error("resolver store failure: {0}")]
    Store(#[from] StoreError),
}

impl ResolverError {
    /// Stable error code for the HTTP envelope and trace rows.
    pub fn code(&self) -> &'static str {
        match self {
            ResolverError::InvalidZip { .. } => "GEO_INVALID_ZIP",
            ResolverError::NeedsPlus4 { .. } => "GEO_NEEDS_PLUS4",
            ResolverError::NoCoverage { .. } => "GEO_NO_COVERAGE_FOR_PERIOD",
            ResolverError::InvalidPeriod(_) => "GEO_INVALID_PERIOD",
            ResolverError::Store(_) => "GEO_RESOLUTION_ERROR",
        }
    }
}

/// Result type for resolution operations
pub type ResolverResult<T> = Result<T, ResolverError>;

/// Tunables for the resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Starting search radius for the nearest-ZIP fallback
    pub initial_radius_miles: f64,

    /// Radius increment when no candidate is found
    pub expand_step_miles: f64,

    /// Give up expanding past this radius
    pub max_radius_miles: f64,

    /// Locality returned when the whole hierarchy misses (non-strict)
    pub benchmark_locality: String,

    /// Version stamped on emitted traces
    pub service_version: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            initial_radius_miles: 25.0,
            expand_step_miles: 10.0,
            max_radius_miles: 100.0,
            benchmark_locality: "01".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// One resolution request.
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    /// ZIP as `ZZZZZ`, `ZZZZZ-PPPP`, or 9 consecutive digits
    pub zip: String,

    /// Separate plus4 parameter; an add-on embedded in `zip` wins
    pub plus4: Option<String>,

    pub valuation_year: Option<i32>,
    pub quarter: Option<u8>,
    pub valuation_date: Option<chrono::NaiveDate>,

    /// Error instead of falling back past an exact match
    pub strict: bool,

    /// Include the carrier/MAC id in the result
    pub expose_carrier: bool,

    /// Per-request radius overrides
    pub initial_radius_miles: Option<f64>,
    pub expand_step_miles: Option<f64>,
    pub max_radius_miles: Option<f64>,
}

/// Resolver over a pricing store.
pub struct GeographyResolver {
    store: Arc<dyn PricingStore>,
    config: ResolverConfig,
}

impl GeographyResolver {
    pub fn new(store: Arc<dyn PricingStore>, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve a ZIP to a locality, emitting a trace either way.
    pub async fn resolve(&self, request: &ResolveRequest) -> ResolverResult<Resolution> {
        let started = Instant::now();
        let outcome = self.resolve_inner(request).await;
        self.emit_trace(request, &outcome, started).await;
        outcome.map(|(resolution, _, _)| resolution)
    }

    /// Resolution plus the normalized inputs, used by trace emission.
    async fn resolve_inner(
        &self,
        request: &ResolveRequest,
    ) -> ResolverResult<(Resolution, String, Option<String>)> {
        let (zip5, plus4) = normalize_zip_input(&request.zip, request.plus4.as_deref())?;

        let period = ValuationPeriod::derive(
            request.valuation_year,
            request.quarter,
            request.valuation_date,
        )
        .map_err(ResolverError::InvalidPeriod)?;

        info!(
            zip5 = %zip5,
            plus4 = ?plus4,
            year = period.year,
            quarter = ?period.quarter,
            strict = request.strict,
            "starting geography resolution"
        );

        // Step 1: ZIP+4 exact match
        if let Some(plus4_value) = &plus4 {
            if let Some(row) = self.store.zip_plus4_row(&zip5, plus4_value, &period).await? {
                info!(zip5 = %zip5, plus4 = %plus4_value, locality = %row.locality_id, "ZIP+4 exact match");
                let resolution =
                    row_resolution(&row, MatchLevel::ZipPlus4, request.expose_carrier);
                return Ok((resolution, zip5, plus4));
            }

            // Step 2: strict gate after a plus4 miss
            if request.strict {
                return Err(ResolverError::NeedsPlus4 {
                    zip5,
                    plus4: plus4_value.clone(),
                });
            }
        }

        // Step 3: ZIP5 exact match
        if let Some(row) = self.store.zip5_row(&zip5, &period).await? {
            info!(zip5 = %zip5, locality = %row.locality_id, "ZIP5 exact match");
            let resolution = row_resolution(&row, MatchLevel::Zip5, request.expose_carrier);
            return Ok((resolution, zip5, plus4));
        }

        // Step 4: strict gate after a ZIP5 miss
        if request.strict {
            return Err(ResolverError::NoCoverage { zip5 });
        }

        // Step 5/6: nearest in-state ZIP with radius expansion
        if let Some(resolution) = self.resolve_nearest(&zip5, &period, request).await? {
            return Ok((resolution, zip5, plus4));
        }

        // Step 7: benchmark locality
        info!(zip5 = %zip5, locality = %self.config.benchmark_locality, "using benchmark locality");
        let resolution = Resolution {
            locality_id: self.config.benchmark_locality.clone(),
            state: None,
            rural_flag: None,
            carrier: request.expose_carrier.then(|| "BENCHMARK".to_string()),
            cbsa: None,
            match_level: MatchLevel::Default,
            dataset_digest: "benchmark".to_string(),
            nearest_zip: None,
            distance_miles: None,
            pobox_fallback: false,
        };
        Ok((resolution, zip5, plus4))
    }

    /// Search candidate geometries in the source ZIP's state, expanding
    /// the radius until a candidate joins back to a geography row.
    async fn resolve_nearest(
        &self,
        zip5: &str,
        period: &ValuationPeriod,
        request: &ResolveRequest,
    ) -> ResolverResult<Option<Resolution>> {
        let Some(source) = self.store.zip_geometry(zip5, period.date).await? else {
            warn!(zip5 = %zip5, "no geometry data for source ZIP");
            return Ok(None);
        };

        let candidates = self
            .store
            .state_geometries(&source.state, zip5, period.date)
            .await?;
        if candidates.is_empty() {
            warn!(zip5 = %zip5, state = %source.state, "no candidate geometries in state");
            return Ok(None);
        }

        let initial = request
            .initial_radius_miles
            .unwrap_or(self.config.initial_radius_miles);
        let step = request
            .expand_step_miles
            .unwrap_or(self.config.expand_step_miles);
        let max = request
            .max_radius_miles
            .unwrap_or(self.config.max_radius_miles);

        let mut radius = initial;
        while radius <= max {
            debug!(zip5 = %zip5, radius_miles = radius, "searching for nearest ZIP");

            if let Some((candidate, distance)) = nearest_candidate(&source, &candidates, radius) {
                if candidate.is_pobox {
                    warn!(
                        zip5 = %zip5,
                        candidate = %candidate.zip5,
                        distance_miles = distance,
                        "only PO-Box candidates available"
                    );
                }

                if let Some(row) = self
                    .store
                    .state_zip_row(&candidate.zip5, &source.state, period)
                    .await?
                {
                    info!(
                        zip5 = %zip5,
                        nearest_zip = %candidate.zip5,
                        distance_miles = distance,
                        locality = %row.locality_id,
                        "nearest ZIP match"
                    );
                    let mut resolution =
                        row_resolution(&row, MatchLevel::Nearest, request.expose_carrier);
                    resolution.nearest_zip = Some(candidate.zip5.clone());
                    resolution.distance_miles = Some(distance);
                    resolution.pobox_fallback = candidate.is_pobox;
                    return Ok(Some(resolution));
                }
            }

            radius += step;
        }

        warn!(zip5 = %zip5, max_radius_miles = max, "no nearest ZIP within max radius");
        Ok(None)
    }

    /// Persist the resolution trace; failures are logged and swallowed.
    async fn emit_trace(
        &self,
        request: &ResolveRequest,
        outcome: &ResolverResult<(Resolution, String, Option<String>)>,
        started: Instant,
    ) {
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let inputs = serde_json::json!({
            "zip": request.zip,
            "plus4": request.plus4,
            "valuation_year": request.valuation_year,
            "quarter": request.quarter,
            "valuation_date": request.valuation_date.map(|d| d.to_string()),
            "strict": request.strict,
        });

        let trace = match outcome {
            Ok((resolution, zip5, plus4)) => ResolutionTrace {
                zip5: zip5.clone(),
                plus4: plus4.clone(),
                inputs,
                match_level: resolution.match_level,
                locality_id: Some(resolution.locality_id.clone()),
                state: resolution.state.clone(),
                rural_flag: resolution.rural_flag,
                nearest_zip: resolution.nearest_zip.clone(),
                distance_miles: resolution.distance_miles,
                dataset_digest: Some(resolution.dataset_digest.clone()),
                latency_ms,
                service_version: self.config.service_version.clone(),
                error_code: None,
                error_message: None,
                resolved_at: Utc::now(),
            },
            Err(err) => ResolutionTrace {
                zip5: normalize_zip_input(&request.zip, request.plus4.as_deref())
                    .map(|(z, _)| z)
                    .unwrap_or_else(|_| request.zip.clone()),
                plus4: request.plus4.clone(),
                inputs,
                match_level: MatchLevel::Error,
                locality_id: None,
                state: None,
                rural_flag: None,
                nearest_zip: None,
                distance_miles: None,
                dataset_digest: None,
                latency_ms,
                service_version: self.config.service_version.clone(),
                error_code: Some(err.code().to_string()),
                error_message: Some(err.to_string()),
                resolved_at: Utc::now(),
            },
        };

        if let Err(err) = self.store.store_resolution_trace(&trace).await {
            warn!(zip5 = %trace.zip5, error = %err, "failed to store resolution trace");
        }
    }
}

fn row_resolution(
    row: &crate::types::GeographyRow,
    match_level: MatchLevel,
    expose_carrier: bool,
) -> Resolution {
    Resolution {
        locality_id: row.locality_id.clone(),
        state: Some(row.state.clone()),
        rural_flag: row.rural_flag,
        carrier: if expose_carrier {
            row.carrier_id.clone()
        } else {
            None
        },
        cbsa: row.cbsa.clone(),
        match_level,
        dataset_digest: row.dataset_digest.clone(),
        nearest_zip: None,
        distance_miles: None,
        pobox_fallback: false,
    }
}

/// Pick the best candidate within the radius.
///
/// Non-PO-Box candidates win over PO-Box ones; within a class the minimum
/// distance wins, with ties broken by ascending ZIP5.
fn nearest_candidate<'a>(
    source: &ZipGeometry,
    candidates: &'a [ZipGeometry],
    radius_miles: f64,
) -> Option<(&'a ZipGeometry, f64)> {
    let in_radius: Vec<(&ZipGeometry, f64)> = candidates
        .iter()
        .map(|c| (c, haversine_miles(source.lat, source.lon, c.lat, c.lon)))
        .filter(|(_, d)| *d <= radius_miles)
        .collect();

    let pick = |pobox: bool| {
        in_radius
            .iter()
            .filter(|(c, _)| c.is_pobox == pobox)
            .min_by(|(a, da), (b, db)| {
                da.partial_cmp(db)
                    .expect("distances are finite")
                    .then_with(|| a.zip5.cmp(&b.zip5))
            })
            .copied()
    };

    pick(false).or_else(|| pick(true))
}

/// Great-circle distance via the Haversine formula, in miles.
pub fn haversine_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    EARTH_RADIUS_MILES * 2.0 * a.sqrt().asin()
}

/// Rural when the flag is `R` or `B`.
pub fn is_rural(flag: Option<RuralFlag>) -> bool {
    flag.is_some()
}
