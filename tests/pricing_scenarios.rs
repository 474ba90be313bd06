//! End-to-end pricing scenarios over the seeded in-memory store

mod common;

use common::*;

use cms_pricer::pricing::{CodePriceParams, LineStatus};
use cms_pricer::types::{BenefitParams, MatchLevel, Setting};

#[tokio::test]
async fn test_mpfs_office_visit_exact_cents() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let mut line = component(1, "99213", Setting::Mpfs);
    line.pos = Some("11".to_string());
    let response = service
        .price_plan(plan_request("94110", vec![line]))
        .await
        .expect("MPFS pricing should succeed");

    // work 1.30 + PE 1.17 + malp 0.09 = 2.56 RVU x 34.6062 = $88.59
    let item = &response.line_items[0];
    assert_eq!(item.status, LineStatus::Priced);
    assert_eq!(item.allowed_cents, 8859);
    assert_eq!(item.beneficiary_deductible_cents, 0);
    assert_eq!(item.beneficiary_coinsurance_cents, 1772);
    assert_eq!(item.beneficiary_total_cents, 1772);
    assert_eq!(item.program_payment_cents, 7087);
    assert_eq!(item.professional_allowed_cents, 8859);
    assert_eq!(item.facility_allowed_cents, 0);
    assert_eq!(response.geography.locality_id, "5");
    assert_eq!(response.geography.match_level, MatchLevel::Zip5);
}

#[tokio::test]
async fn test_mpfs_facility_pe_when_pos_unset() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let response = service
        .price_plan(plan_request("94110", vec![component(1, "99213", Setting::Mpfs)]))
        .await
        .unwrap();

    // Facility PE RVU 0.55: 1.94 RVU x 34.6062 = $67.14
    assert_eq!(response.line_items[0].allowed_cents, 6714);
}

#[tokio::test]
async fn test_units_and_bilateral_modifier_scaling() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let mut doubled = component(1, "99213", Setting::Mpfs);
    doubled.pos = Some("11".to_string());
    doubled.units = Some(2.0);

    let mut bilateral = component(2, "99213", Setting::Mpfs);
    bilateral.pos = Some("11".to_string());
    bilateral.modifiers = vec!["-50".to_string()];

    let response = service
        .price_plan(plan_request("94110", vec![doubled, bilateral]))
        .await
        .unwrap();

    assert_eq!(response.line_items[0].allowed_cents, 17_718);
    assert_eq!(response.line_items[1].allowed_cents, 13_288);
}

#[tokio::test]
async fn test_opps_packaged_line_prices_to_zero() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let response = service
        .price_plan(plan_request("94110", vec![component(1, "80053", Setting::Opps)]))
        .await
        .unwrap();

    let item = &response.line_items[0];
    assert!(item.packaged);
    assert_eq!(item.allowed_cents, 0);
    assert_eq!(item.beneficiary_total_cents, 0);
    assert_eq!(item.program_payment_cents, 0);
    assert_eq!(item.status, LineStatus::Priced);
}

#[tokio::test]
async fn test_opps_wage_adjusted_line() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let response = service
        .price_plan(plan_request("94110", vec![component(1, "G0463", Setting::Opps)]))
        .await
        .unwrap();

    // $120.00 national x 1.25 SF wage index = $150.00
    let item = &response.line_items[0];
    assert_eq!(item.allowed_cents, 15_000);
    assert_eq!(item.facility_allowed_cents, 15_000);
    assert_eq!(item.professional_allowed_cents, 0);
    assert_eq!(item.beneficiary_coinsurance_cents, 3_000);
    assert!(!item.packaged);
}

#[tokio::test]
async fn test_ipps_drg_with_part_a_deductible() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let response = service
        .price_plan(plan_request("94110", vec![component(1, "470", Setting::Ipps)]))
        .await
        .unwrap();

    // (6000 x 1.2 + 500 x 1.2) x 2.0 = $15,600.00
    let item = &response.line_items[0];
    assert_eq!(item.allowed_cents, 1_560_000);
    // The $1,600 Part A admission deductible lands on this line, no
    // coinsurance
    assert_eq!(item.beneficiary_deductible_cents, 160_000);
    assert_eq!(item.beneficiary_coinsurance_cents, 0);
    assert_eq!(item.program_payment_cents, 1_400_000);
    // The Part B deductible is untouched
    assert_eq!(response.remaining_deductible_cents, 0);
}

#[tokio::test]
async fn test_asc_and_clfs_flat_fees() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let response = service
        .price_plan(plan_request(
            "94110",
            vec![
                component(1, "66984", Setting::Asc),
                component(2, "80053", Setting::Clfs),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(response.line_items[0].allowed_cents, 150_000);
    assert_eq!(response.line_items[0].facility_allowed_cents, 150_000);
    assert_eq!(response.line_items[1].allowed_cents, 1_000);
    assert_eq!(response.line_items[1].professional_allowed_cents, 1_000);
}

#[tokio::test]
async fn test_dmepos_rural_split() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let urban = service
        .price_plan(plan_request("94110", vec![component(1, "E0601", Setting::Dmepos)]))
        .await
        .unwrap();
    assert_eq!(urban.line_items[0].allowed_cents, 7_500);

    let rural = service
        .price_plan(plan_request("89301", vec![component(1, "E0601", Setting::Dmepos)]))
        .await
        .unwrap();
    assert_eq!(rural.line_items[0].allowed_cents, 8_200);
}

#[tokio::test]
async fn test_drug_asp_with_nadac_reference() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let mut line = component(1, "J1100", Setting::Drug);
    line.ndc11 = Some("00003029311".to_string());
    let response = service
        .price_plan(plan_request("94110", vec![line]))
        .await
        .unwrap();

    // ASP $2.50 x 1.06 = $2.65
    let item = &response.line_items[0];
    assert_eq!(item.allowed_cents, 265);
    // NADAC $0.30 x 10 units per HCPCS = $3.00 reference
    assert_eq!(item.reference_price_cents, Some(300));
    let conversion = item.unit_conversion.as_ref().expect("unit conversion");
    assert_eq!(conversion.units_per_hcpcs, 10.0);
    assert_eq!(conversion.nadac_unit_price_cents, 30);
}

#[tokio::test]
async fn test_drug_crosswalk_miss_is_note_not_failure() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    // This NDC has a NADAC price but no crosswalk to J1100
    let mut line = component(1, "J1100", Setting::Drug);
    line.ndc11 = Some("99999000001".to_string());
    let response = service
        .price_plan(plan_request("94110", vec![line]))
        .await
        .unwrap();

    let item = &response.line_items[0];
    assert_eq!(item.status, LineStatus::Priced);
    assert_eq!(item.allowed_cents, 265);
    assert_eq!(item.reference_price_cents, None);
    assert!(
        response.warnings.iter().any(|w| w.contains("crosswalk")),
        "warnings: {:?}",
        response.warnings
    );
}

#[tokio::test]
async fn test_cents_conservation_across_mixed_plan() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let mut mpfs = component(1, "99213", Setting::Mpfs);
    mpfs.pos = Some("11".to_string());
    let response = service
        .price_plan(plan_request(
            "94110",
            vec![
                mpfs,
                component(2, "G0463", Setting::Opps),
                component(3, "80053", Setting::Clfs),
                component(4, "470", Setting::Ipps),
            ],
        ))
        .await
        .unwrap();

    for item in &response.line_items {
        assert_eq!(
            item.program_payment_cents + item.beneficiary_total_cents,
            item.allowed_cents,
            "line {} does not conserve cents",
            item.sequence
        );
    }
    assert_eq!(
        response.totals.program_payment_cents + response.totals.beneficiary_total_cents,
        response.totals.allowed_cents
    );
    // Line results emit in sequence order
    let sequences: Vec<i32> = response.line_items.iter().map(|l| l.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_deductible_threads_through_lines() {
    let store = seeded_store().await;
    store
        .insert_benefit_params(BenefitParams {
            year: 2025,
            part_b_deductible_cents: 2_000,
            part_b_coinsurance_rate: 0.20,
            part_a_deductible_cents: 160_000,
        })
        .await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let mut first = component(1, "99213", Setting::Mpfs);
    first.pos = Some("11".to_string());
    let mut second = component(2, "99213", Setting::Mpfs);
    second.pos = Some("11".to_string());

    let response = service
        .price_plan(plan_request("94110", vec![first, second]))
        .await
        .unwrap();

    // First line absorbs the whole $20 deductible
    let line1 = &response.line_items[0];
    assert_eq!(line1.beneficiary_deductible_cents, 2_000);
    assert_eq!(line1.beneficiary_coinsurance_cents, 1_372); // (8859-2000) x 0.2

    // Second line sees no deductible left
    let line2 = &response.line_items[1];
    assert_eq!(line2.beneficiary_deductible_cents, 0);
    assert_eq!(line2.beneficiary_coinsurance_cents, 1_772);

    assert_eq!(response.remaining_deductible_cents, 0);
}

#[tokio::test]
async fn test_line_failure_warns_and_continues() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let mut good = component(2, "99213", Setting::Mpfs);
    good.pos = Some("11".to_string());
    let response = service
        .price_plan(plan_request(
            "94110",
            vec![component(1, "00000", Setting::Mpfs), good],
        ))
        .await
        .expect("non-strict run continues past a line failure");

    assert_eq!(response.line_items.len(), 2);
    assert_eq!(response.line_items[0].status, LineStatus::Failed);
    assert_eq!(
        response.line_items[0]
            .error
            .as_ref()
            .map(|e| e.code.as_str()),
        Some("PRICING_SCHEDULE_MISS")
    );
    assert_eq!(response.line_items[1].status, LineStatus::Priced);
    assert_eq!(response.totals.allowed_cents, 8859);
    assert!(!response.warnings.is_empty());
}

#[tokio::test]
async fn test_strict_run_aborts_on_line_failure() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let mut request = plan_request("94110", vec![component(1, "00000", Setting::Mpfs)]);
    request.strict = true;
    let err = service.price_plan(request).await.unwrap_err();
    assert_eq!(err.code(), "PRICING_SCHEDULE_MISS");
}

#[tokio::test]
async fn test_sequestration_reported_without_breaking_conservation() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let mut line = component(1, "99213", Setting::Mpfs);
    line.pos = Some("11".to_string());
    let mut request = plan_request("94110", vec![line]);
    request.apply_sequestration = true;

    let response = service.price_plan(request).await.unwrap();
    assert!(response.sequestration_applied);
    // 2% of the $70.87 program payment
    assert_eq!(response.sequestration_reduction_cents, 142);
    // Gross totals still conserve cents
    assert_eq!(
        response.totals.program_payment_cents + response.totals.beneficiary_total_cents,
        response.totals.allowed_cents
    );
}

#[tokio::test]
async fn test_stored_plan_prices_in_sequence_order() {
    use cms_pricer::store::PlanStore;
    use cms_pricer::types::{Plan, PlanComponent};

    let store = seeded_store().await;
    let plan_id = uuid::Uuid::new_v4();
    let mut visit = PlanComponent::new(2, "99213", Setting::Mpfs);
    visit.pos = Some("11".to_string());
    store
        .upsert_plan(&Plan {
            id: plan_id,
            name: "Knee replacement episode".to_string(),
            description: None,
            created_at: chrono::Utc::now(),
            updated_at: None,
            // Inserted out of order on purpose
            components: vec![visit, PlanComponent::new(1, "470", Setting::Ipps)],
        })
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let mut request = plan_request("94110", vec![]);
    request.ad_hoc_plan = None;
    request.plan_id = Some(plan_id);
    let response = service.price_plan(request).await.unwrap();

    assert_eq!(response.plan_name, "Knee replacement episode");
    assert_eq!(response.plan_id, Some(plan_id));
    let order: Vec<(i32, String)> = response
        .line_items
        .iter()
        .map(|l| (l.sequence, l.code.clone()))
        .collect();
    assert_eq!(
        order,
        vec![(1, "470".to_string()), (2, "99213".to_string())]
    );
}

#[tokio::test]
async fn test_price_single_code() {
    let store = seeded_store().await;
    let dir = tempfile::tempdir().unwrap();
    let service = pricing_service(store, dir.path());

    let response = service
        .price_single_code(CodePriceParams {
            zip: "94110".to_string(),
            code: "G0463".to_string(),
            setting: Setting::Opps,
            year: 2025,
            quarter: Some(1),
            ccn: None,
            payer: None,
            plan: None,
        })
        .await
        .expect("single-code pricing should succeed");

    assert_eq!(response.line.allowed_cents, 15_000);
    assert_eq!(response.geography.locality_id, "5");
    assert!(response
        .datasets_used
        .contains(&"opps-digest-2025q1".to_string()));
}
