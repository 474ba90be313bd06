//! Comparison parity and replay determinism

mod common;

use common::*;

use std::sync::Arc;

use cms_pricer::pricing::{ComparisonRequest, ParityViolation};
use cms_pricer::snapshot::SnapshotRegistry;
use cms_pricer::store::MemoryStore;
use cms_pricer::trace::TraceService;
use cms_pricer::types::*;

fn comparison(zip_a: &str, zip_b: &str, components: Vec<AdHocComponent>) -> ComparisonRequest {
    let plan = plan_request(zip_a, components);
    ComparisonRequest {
        zip_a: zip_a.to_string(),
        zip_b: zip_b.to_string(),
        ccn_a: None,
        ccn_b: None,
        plan_id: None,
        ad_hoc_plan: plan.ad_hoc_plan,
        year: 2025,
        quarter: Some(1),
        valuation_date: None,
        payer: None,
        plan: None,
        include_home_health: false,
        include_snf: false,
        apply_sequestration: false,
        sequestration_rate: 0.02,
        format: Default::default(),
        strict: false,
    }
}

#[tokio::test]
async fn test_comparison_with_matching_digests_passes_parity() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let mut line = component(1, "99213", Setting::Mpfs);
    line.pos = Some("11".to_string());
    let response = service
        .compare(comparison("94110", "10001", vec![line]))
        .await
        .expect("comparison should succeed");

    assert!(response.parity.valid, "violations: {:?}", response.parity.violations);
    assert!(response.parity.snapshots_match);
    // Manhattan GPCIs are higher, so side B costs more
    assert!(response.total_delta_cents > 0);
    assert_eq!(
        response.deltas[0].delta_cents,
        response.location_b.totals.allowed_cents - response.location_a.totals.allowed_cents
    );
}

#[tokio::test]
async fn test_comparison_digest_mismatch_fails_parity_but_returns_numbers() {
    // A store where side B's wage index was ingested under a different
    // dataset version
    let store = Arc::new(MemoryStore::new());
    for (zip, state, locality, cbsa) in
        [("94110", "CA", "5", "41860"), ("10001", "NY", "2", "35620")]
    {
        store
            .insert_geography_row(GeographyRow {
                zip5: zip.to_string(),
                plus4: None,
                has_plus4: false,
                state: state.to_string(),
                locality_id: locality.to_string(),
                carrier_id: None,
                cbsa: Some(cbsa.to_string()),
                rural_flag: None,
                effective_from: d(2025, 1, 1),
                effective_to: None,
                dataset_digest: GEO_DIGEST.to_string(),
            })
            .await;
    }
    store
        .insert_opps_row(OppsRow {
            year: 2025,
            quarter: 1,
            hcpcs: "G0463".to_string(),
            status_indicator: "S".to_string(),
            apc_code: None,
            national_unadj_rate_cents: 12_000,
            packaging_flag: false,
            dataset_digest: "opps-digest-2025q1".to_string(),
        })
        .await;
    store
        .insert_wage_index(WageIndexRow {
            year: 2025,
            quarter: Some(1),
            cbsa: "41860".to_string(),
            wage_index: 1.25,
            dataset_digest: "wage-digest-2025q1".to_string(),
        })
        .await;
    store
        .insert_wage_index(WageIndexRow {
            year: 2025,
            quarter: Some(1),
            cbsa: "35620".to_string(),
            wage_index: 1.10,
            dataset_digest: "wage-digest-2025q1-resubmission".to_string(),
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let response = service
        .compare(comparison("94110", "10001", vec![component(1, "G0463", Setting::Opps)]))
        .await
        .expect("parity violations do not fail the comparison");

    assert!(!response.parity.valid);
    assert!(response
        .parity
        .violations
        .contains(&ParityViolation::DatasetDigestDiffer));
    assert!(!response.parity.snapshots_match);
    assert!(response.parity.toggles_match);
    // Both sides' numbers are still returned
    assert_eq!(response.location_a.totals.allowed_cents, 15_000);
    assert_eq!(response.location_b.totals.allowed_cents, 13_200);
}

#[tokio::test]
async fn test_replay_of_pricing_run_is_equal() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let mut line = component(1, "99213", Setting::Mpfs);
    line.pos = Some("11".to_string());
    let mut drug = component(2, "J1100", Setting::Drug);
    drug.ndc11 = Some("00003029311".to_string());

    let response = service
        .price_plan(plan_request("94110", vec![line, drug]))
        .await
        .unwrap();

    let report = service.replay(response.run_id).await.expect("replay runs");
    assert!(report.equal, "diffs: {:?}", report.diffs);
    assert_eq!(report.endpoint, "/pricing/price");
    assert!(report
        .datasets_used
        .contains(&MPFS_DIGEST.to_string()));
}

#[tokio::test]
async fn test_replay_of_comparison_run_is_equal() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let mut line = component(1, "99213", Setting::Mpfs);
    line.pos = Some("11".to_string());
    let response = service
        .compare(comparison("94110", "10001", vec![line]))
        .await
        .unwrap();

    let report = service
        .replay(response.run_id)
        .await
        .expect("comparison replay runs");
    assert!(report.equal, "diffs: {:?}", report.diffs);
}

#[tokio::test]
async fn test_replay_unknown_run_fails() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let err = service.replay(uuid::Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.code(), "TRACE_RUN_NOT_FOUND");
}

#[tokio::test]
async fn test_trace_read_path_assembles_run() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store.clone(), dir.path());

    let mut line = component(1, "99213", Setting::Mpfs);
    line.pos = Some("11".to_string());
    let response = service
        .price_plan(plan_request("94110", vec![line]))
        .await
        .unwrap();

    let trace_service = TraceService::new(store);
    let trace = trace_service.get_trace(response.run_id).await.unwrap();

    assert_eq!(trace.run_id, response.run_id);
    assert_eq!(trace.endpoint, "/pricing/price");
    assert_eq!(trace.outputs.len(), 1);
    assert_eq!(trace.outputs[0].code, "99213");
    assert!(!trace.inputs.is_empty());
    assert!(trace.traces.iter().any(|t| t.kind == "geo_resolution"));
    assert!(trace.traces.iter().any(|t| t.kind == "run_summary"));
    assert!(trace.datasets_used.contains(&GEO_DIGEST.to_string()));
    assert!(trace.datasets_used.contains(&MPFS_DIGEST.to_string()));
}

async fn seed_geography(store: &MemoryStore, order: &[(&str, &str)]) {
    for (zip, locality) in order {
        store
            .insert_geography_row(GeographyRow {
                zip5: zip.to_string(),
                plus4: None,
                has_plus4: false,
                state: "XX".to_string(),
                locality_id: locality.to_string(),
                carrier_id: None,
                cbsa: None,
                rural_flag: None,
                effective_from: d(2025, 1, 1),
                effective_to: None,
                dataset_digest: "seed".to_string(),
            })
            .await;
    }
}

#[tokio::test]
async fn test_geography_digest_is_insertion_order_independent() {
    let forward = Arc::new(MemoryStore::new());
    seed_geography(&forward, &[("94110", "5"), ("10001", "2"), ("01434", "1")]).await;

    let reversed = Arc::new(MemoryStore::new());
    seed_geography(&reversed, &[("01434", "1"), ("10001", "2"), ("94110", "5")]).await;

    let digest_a = SnapshotRegistry::new(forward)
        .current_geography_digest()
        .await
        .unwrap();
    let digest_b = SnapshotRegistry::new(reversed)
        .current_geography_digest()
        .await
        .unwrap();
    assert_eq!(digest_a, digest_b);
}
