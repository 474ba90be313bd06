//! Snapshot registry: effective-dated, digest-identified dataset versions
//!
//! Snapshots are append-only; serving code selects among them by effective
//! window and can pin a digest so reproducibility tests have a fixed point
//! of comparison. The digest is a SHA-256 over a canonical serialization
//! of the dataset's row tuples and therefore depends only on the row set,
//! never on insertion order.

mod digest;

pub use digest::{canonicalize_rows, compute_digest, geography_row_tuple};

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::resolver::{GeographyResolver, ResolveRequest};
use crate::store::{GeographyStore, PricingStore, SnapshotStore, StoreError};
use crate::types::{
    window_covers, DigestPin, ReproducibilityCheck, ReproducibilityReport, Snapshot,
};

/// Error type for registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No snapshot covers the requested date (strict selection)
    #[error("no {dataset_id} snapshot covers {effective_at}")]
    NoSnapshot {
        dataset_id: String,
        effective_at: NaiveDate,
    },

    /// Digest not present in the snapshot catalog
    #[error("digest {0} not found in the snapshot catalog")]
    UnknownDigest(String),

    /// Pin name not found
    #[error("pin {0} not found")]
    UnknownPin(String),

    /// Underlying store failure
    #[error("registry store failure: {0}")]
    Store(#[from] StoreError),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// How to handle a date no snapshot covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Fail with [`RegistryError::NoSnapshot`]
    Strict,

    /// Fall back to the snapshot with the greatest
    /// `effective_from <= effective_at`, logging a warning
    LatestBefore,
}

/// Registry over the snapshot catalog.
pub struct SnapshotRegistry {
    store: Arc<dyn PricingStore>,
}

impl SnapshotRegistry {
    pub fn new(store: Arc<dyn PricingStore>) -> Self {
        Self { store }
    }

    /// Select the active snapshot for a dataset at a date.
    ///
    /// Among snapshots whose effective window covers the date, the one
    /// with the most recent `effective_from` wins.
    pub async fn select_at(
        &self,
        dataset_id: &str,
        effective_at: NaiveDate,
        mode: SelectionMode,
    ) -> RegistryResult<Snapshot> {
        let snapshots = self.store.snapshots(dataset_id).await?;

        let covering = snapshots
            .iter()
            .filter(|s| window_covers(s.effective_from, s.effective_to, effective_at))
            .max_by_key(|s| s.effective_from);

        if let Some(snapshot) = covering {
            return Ok(snapshot.clone());
        }

        match mode {
            SelectionMode::Strict => Err(RegistryError::NoSnapshot {
                dataset_id: dataset_id.to_string(),
                effective_at,
            }),
            SelectionMode::LatestBefore => {
                let fallback = snapshots
                    .iter()
                    .filter(|s| s.effective_from <= effective_at)
                    .max_by_key(|s| s.effective_from)
                    .cloned()
                    .ok_or_else(|| RegistryError::NoSnapshot {
                        dataset_id: dataset_id.to_string(),
                        effective_at,
                    })?;
                warn!(
                    dataset_id = dataset_id,
                    effective_at = %effective_at,
                    effective_from = %fallback.effective_from,
                    "no covering snapshot, using latest-before fallback"
                );
                Ok(fallback)
            }
        }
    }

    /// Look up a snapshot by its digest.
    pub async fn by_digest(&self, digest: &str) -> RegistryResult<Snapshot> {
        self.store
            .snapshot_by_digest(digest)
            .await?
            .ok_or_else(|| RegistryError::UnknownDigest(digest.to_string()))
    }

    /// Recompute the geography dataset digest from the current row set.
    pub async fn current_geography_digest(&self) -> RegistryResult<String> {
        let rows = self.store.geography_rows().await?;
        let tuples: Vec<Vec<String>> = rows.iter().map(geography_row_tuple).collect();
        Ok(compute_digest(tuples))
    }

    /// Pin a digest under a name for reproducibility tests.
    ///
    /// The digest must exist in the snapshot catalog or match the
    /// current geography row set.
    pub async fn pin_digest(&self, pin_name: &str, digest: &str) -> RegistryResult<DigestPin> {
        let known = self.store.snapshot_by_digest(digest).await?.is_some()
            || self.current_geography_digest().await? == digest;
        if !known {
            return Err(RegistryError::UnknownDigest(digest.to_string()));
        }

        let pin = DigestPin {
            pin_name: pin_name.to_string(),
            digest: digest.to_string(),
            pinned_at: Utc::now(),
        };
        self.store.record_pin(&pin).await?;
        info!(pin_name = pin_name, digest = digest, "dataset digest pinned");
        Ok(pin)
    }

    /// Verify reproducibility of a pin against sample ZIPs.
    ///
    /// Each ZIP is resolved and its `dataset_digest` compared to the pin.
    /// The score is the fraction of successful resolutions whose digest
    /// matched.
    pub async fn verify_reproducibility(
        &self,
        pin_name: &str,
        sample_zips: &[String],
        resolver: &GeographyResolver,
        valuation_year: i32,
    ) -> RegistryResult<ReproducibilityReport> {
        let pin = self
            .store
            .pin(pin_name)
            .await?
            .ok_or_else(|| RegistryError::UnknownPin(pin_name.to_string()))?;

        let mut checks = Vec::with_capacity(sample_zips.len());
        for zip in sample_zips {
            let outcome = resolver
                .resolve(&ResolveRequest {
                    zip: zip.clone(),
                    valuation_year: Some(valuation_year),
                    ..Default::default()
                })
                .await;

            checks.push(match outcome {
                Ok(resolution) => ReproducibilityCheck {
                    zip5: zip.clone(),
                    success: true,
                    locality_id: Some(resolution.locality_id.clone()),
                    match_level: Some(resolution.match_level.as_str().to_string()),
                    digest_match: resolution.dataset_digest == pin.digest,
                    dataset_digest: Some(resolution.dataset_digest),
                    error: None,
                },
                Err(err) => ReproducibilityCheck {
                    zip5: zip.clone(),
                    success: false,
                    locality_id: None,
                    match_level: None,
                    dataset_digest: None,
                    digest_match: false,
                    error: Some(err.to_string()),
                },
            });
        }

        let successes = checks.iter().filter(|c| c.success).count();
        let matches = checks.iter().filter(|c| c.digest_match).count();
        let score = if successes == 0 {
            0.0
        } else {
            (matches as f64 / successes as f64 * 1000.0).round() / 1000.0
        };

        info!(
            pin_name = pin_name,
            score = score,
            samples = sample_zips.len(),
            "reproducibility verification completed"
        );

        Ok(ReproducibilityReport {
            pin_name: pin_name.to_string(),
            pinned_digest: pin.digest,
            score,
            checks,
            verified_at: Utc::now(),
        })
    }
}
