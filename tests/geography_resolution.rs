//! Integration tests for the geography resolution hierarchy

mod common;

use common::*;

use cms_pricer::resolver::{ResolveRequest, ResolverError};
use cms_pricer::store::RunStore;
use cms_pricer::types::{MatchLevel, RuralFlag};

fn request(zip: &str) -> ResolveRequest {
    ResolveRequest {
        zip: zip.to_string(),
        valuation_year: Some(2025),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_zip_plus4_exact_match() {
    let store = seeded_store().await;
    let resolver = resolver(store);

    let resolution = resolver
        .resolve(&ResolveRequest {
            plus4: Some("0001".to_string()),
            ..request("01434")
        })
        .await
        .expect("ZIP+4 resolution should succeed");

    assert_eq!(resolution.match_level, MatchLevel::ZipPlus4);
    assert_eq!(resolution.locality_id, "1");
    assert_eq!(resolution.state.as_deref(), Some("MA"));
    assert_eq!(resolution.rural_flag, Some(RuralFlag::Rural));
    assert_eq!(resolution.dataset_digest, GEO_DIGEST);
}

#[tokio::test]
async fn test_zip5_fallback_when_plus4_misses() {
    let store = seeded_store().await;
    let resolver = resolver(store);

    let resolution = resolver
        .resolve(&ResolveRequest {
            plus4: Some("9999".to_string()),
            ..request("94110")
        })
        .await
        .expect("ZIP5 fallback should succeed");

    assert_eq!(resolution.match_level, MatchLevel::Zip5);
    assert_eq!(resolution.locality_id, "5");
    assert_eq!(resolution.state.as_deref(), Some("CA"));
}

#[tokio::test]
async fn test_strict_needs_plus4() {
    let store = seeded_store().await;
    let resolver = resolver(store.clone());

    let err = resolver
        .resolve(&ResolveRequest {
            plus4: Some("9999".to_string()),
            strict: true,
            ..request("94110")
        })
        .await
        .expect_err("strict mode must not fall back past a plus4 miss");

    match &err {
        ResolverError::NeedsPlus4 { zip5, plus4 } => {
            assert_eq!(zip5, "94110");
            assert_eq!(plus4, "9999");
        }
        other => panic!("expected NeedsPlus4, got {:?}", other),
    }
    // The user-facing message names the full ZIP+4
    assert!(err.to_string().contains("94110-9999"));

    // A trace row was written with match_level=error
    let stats = store.resolution_stats(Some("94110")).await.unwrap();
    assert_eq!(stats.errors, 1);
}

#[tokio::test]
async fn test_strict_no_coverage_without_plus4() {
    let store = seeded_store().await;
    let resolver = resolver(store);

    let err = resolver
        .resolve(&ResolveRequest {
            strict: true,
            ..request("89999")
        })
        .await
        .expect_err("strict mode must not fall back past a ZIP5 miss");
    assert!(matches!(err, ResolverError::NoCoverage { .. }));
    assert_eq!(err.code(), "GEO_NO_COVERAGE_FOR_PERIOD");
}

#[tokio::test]
async fn test_invalid_zip_rejected() {
    let store = seeded_store().await;
    let resolver = resolver(store);

    for bad in ["9411", "941106", "", "abcde-fghi"] {
        let err = resolver.resolve(&request(bad)).await.expect_err(bad);
        assert!(matches!(err, ResolverError::InvalidZip { .. }), "{}", bad);
    }
}

#[tokio::test]
async fn test_nearest_in_state_fallback() {
    let store = seeded_store().await;
    // 94952 has geometry but no geography row; 94110 is ~40 miles away
    // and carries one
    let resolver = resolver(store);

    let resolution = resolver
        .resolve(&request("94952"))
        .await
        .expect("nearest fallback should succeed");

    assert_eq!(resolution.match_level, MatchLevel::Nearest);
    assert_eq!(resolution.nearest_zip.as_deref(), Some("94110"));
    assert_eq!(resolution.locality_id, "5");
    assert_eq!(resolution.state.as_deref(), Some("CA"));
    let distance = resolution.distance_miles.expect("distance present");
    assert!(distance > 0.0 && distance <= 100.0, "distance {}", distance);
    assert!(!resolution.pobox_fallback);
}

#[tokio::test]
async fn test_pobox_only_candidate_is_used_and_marked() {
    let store = seeded_store().await;
    let resolver = resolver(store);

    // 59000 has geometry but no coverage; the only in-state candidate is
    // a PO-Box ZIP about a mile away
    let resolution = resolver
        .resolve(&request("59000"))
        .await
        .expect("PO-Box-only fallback should still resolve");

    assert_eq!(resolution.match_level, MatchLevel::Nearest);
    assert_eq!(resolution.nearest_zip.as_deref(), Some("59001"));
    assert_eq!(resolution.locality_id, "4");
    assert!(resolution.pobox_fallback, "PO-Box fallback must be marked");
}

#[tokio::test]
async fn test_benchmark_default_when_hierarchy_exhausted() {
    let store = seeded_store().await;
    let resolver = resolver(store);

    // No geography row and no geometry at all
    let resolution = resolver
        .resolve(&request("73301"))
        .await
        .expect("non-strict resolution always succeeds");

    assert_eq!(resolution.match_level, MatchLevel::Default);
    assert_eq!(resolution.locality_id, "01");
    assert_eq!(resolution.dataset_digest, "benchmark");
    assert_eq!(resolution.state, None);
}

#[tokio::test]
async fn test_carrier_exposed_only_on_request() {
    let store = seeded_store().await;
    let resolver = resolver(store);

    let hidden = resolver.resolve(&request("94110")).await.unwrap();
    assert_eq!(hidden.carrier, None);

    let exposed = resolver
        .resolve(&ResolveRequest {
            expose_carrier: true,
            ..request("94110")
        })
        .await
        .unwrap();
    assert_eq!(exposed.carrier.as_deref(), Some("MAC-CA"));
}

#[tokio::test]
async fn test_trace_written_for_success() {
    let store = seeded_store().await;
    let resolver = resolver(store.clone());

    resolver.resolve(&request("94110")).await.unwrap();
    resolver.resolve(&request("94110")).await.unwrap();

    let stats = store.resolution_stats(Some("94110")).await.unwrap();
    assert_eq!(stats.total_calls, 2);
    assert_eq!(stats.zip5_matches, 2);
    assert_eq!(stats.unique_zips, 1);
}
