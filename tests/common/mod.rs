#![allow(dead_code)]

//! Shared fixtures for the integration suites
//!
//! One in-memory store seeded with a small but realistic slice of
//! reference data: Massachusetts ZIP+4 coverage, San Francisco and
//! Manhattan ZIP5 coverage, and 2025 schedule rows for every setting.

use chrono::NaiveDate;
use std::sync::Arc;

use cms_pricer::cache::{CacheConfig, CacheManager};
use cms_pricer::config::Settings;
use cms_pricer::pricing::PricingService;
use cms_pricer::resolver::{GeographyResolver, ResolverConfig};
use cms_pricer::store::MemoryStore;
use cms_pricer::types::*;

pub const GEO_DIGEST: &str = "geo-digest-v1";
pub const MPFS_DIGEST: &str = "mpfs-digest-2025";
pub const WAGE_DIGEST: &str = "wage-digest-2025q1";

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn geo_row(
    zip5: &str,
    plus4: Option<&str>,
    state: &str,
    locality: &str,
    cbsa: Option<&str>,
    rural: Option<RuralFlag>,
    digest: &str,
) -> GeographyRow {
    GeographyRow {
        zip5: zip5.to_string(),
        plus4: plus4.map(String::from),
        has_plus4: plus4.is_some(),
        state: state.to_string(),
        locality_id: locality.to_string(),
        carrier_id: Some(format!("MAC-{}", state)),
        cbsa: cbsa.map(String::from),
        rural_flag: rural,
        effective_from: d(2025, 1, 1),
        effective_to: None,
        dataset_digest: digest.to_string(),
    }
}

fn geometry(zip5: &str, state: &str, lat: f64, lon: f64, pobox: bool) -> ZipGeometry {
    ZipGeometry {
        zip5: zip5.to_string(),
        lat,
        lon,
        state: state.to_string(),
        is_pobox: pobox,
        effective_from: d(2020, 1, 1),
        effective_to: None,
    }
}

/// Seed the standard fixture data set.
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());

    // Geography: MA ZIP+4 coverage, CA and NY ZIP5 coverage
    store
        .insert_geography_row(geo_row(
            "01434",
            Some("0001"),
            "MA",
            "1",
            Some("15764"),
            Some(RuralFlag::Rural),
            GEO_DIGEST,
        ))
        .await;
    store
        .insert_geography_row(geo_row(
            "94110",
            None,
            "CA",
            "5",
            Some("41860"),
            None,
            GEO_DIGEST,
        ))
        .await;
    store
        .insert_geography_row(geo_row(
            "10001",
            None,
            "NY",
            "2",
            Some("35620"),
            None,
            GEO_DIGEST,
        ))
        .await;
    // Rural Nevada ZIP used by the DMEPOS scenarios
    store
        .insert_geography_row(geo_row(
            "89301",
            None,
            "NV",
            "3",
            Some("21220"),
            Some(RuralFlag::SuperRural),
            GEO_DIGEST,
        ))
        .await;

    // Geometry for the nearest-neighbor scenarios
    store.insert_zip_geometry(geometry("94110", "CA", 37.7485, -122.4184, false)).await;
    store.insert_zip_geometry(geometry("94952", "CA", 38.2324, -122.6367, false)).await;
    store.insert_zip_geometry(geometry("94999", "CA", 38.2400, -122.6300, true)).await;

    // Montana: the only in-state candidate is a PO-Box ZIP
    store.insert_zip_geometry(geometry("59000", "MT", 46.5958, -112.0270, false)).await;
    store.insert_zip_geometry(geometry("59001", "MT", 46.6000, -112.0400, true)).await;
    store
        .insert_geography_row(geo_row(
            "59001",
            None,
            "MT",
            "4",
            None,
            Some(RuralFlag::Rural),
            GEO_DIGEST,
        ))
        .await;

    // Physician fee schedule: SF locality 5 and Manhattan locality 2
    store
        .insert_mpfs_row(MpfsRow {
            year: 2025,
            locality_id: "5".to_string(),
            hcpcs: "99213".to_string(),
            work_rvu: 1.30,
            pe_nonfac_rvu: 1.17,
            pe_fac_rvu: 0.55,
            malp_rvu: 0.09,
            status_code: Some("A".to_string()),
            global_days: Some("000".to_string()),
            dataset_digest: MPFS_DIGEST.to_string(),
        })
        .await;
    store
        .insert_mpfs_row(MpfsRow {
            year: 2025,
            locality_id: "2".to_string(),
            hcpcs: "99213".to_string(),
            work_rvu: 1.30,
            pe_nonfac_rvu: 1.17,
            pe_fac_rvu: 0.55,
            malp_rvu: 0.09,
            status_code: Some("A".to_string()),
            global_days: Some("000".to_string()),
            dataset_digest: MPFS_DIGEST.to_string(),
        })
        .await;
    store
        .insert_gpci_row(GpciRow {
            year: 2025,
            locality_id: "5".to_string(),
            gpci_work: 1.0,
            gpci_pe: 1.0,
            gpci_malp: 1.0,
            dataset_digest: MPFS_DIGEST.to_string(),
        })
        .await;
    store
        .insert_gpci_row(GpciRow {
            year: 2025,
            locality_id: "2".to_string(),
            gpci_work: 1.05,
            gpci_pe: 1.10,
            gpci_malp: 1.02,
            dataset_digest: MPFS_DIGEST.to_string(),
        })
        .await;
    store
        .insert_conversion_factor(ConversionFactor {
            year: 2025,
            kind: ConversionFactorKind::Physician,
            value: 34.6062,
            dataset_digest: MPFS_DIGEST.to_string(),
        })
        .await;

    // Outpatient: one packaged lab panel, one separately payable clinic
    // visit
    store
        .insert_opps_row(OppsRow {
            year: 2025,
            quarter: 1,
            hcpcs: "80053".to_string(),
            status_indicator: "N".to_string(),
            apc_code: None,
            national_unadj_rate_cents: 1530,
            packaging_flag: true,
            dataset_digest: "opps-digest-2025q1".to_string(),
        })
        .await;
    store
        .insert_opps_row(OppsRow {
            year: 2025,
            quarter: 1,
            hcpcs: "G0463".to_string(),
            status_indicator: "S".to_string(),
            apc_code: Some("5012".to_string()),
            national_unadj_rate_cents: 12_000,
            packaging_flag: false,
            dataset_digest: "opps-digest-2025q1".to_string(),
        })
        .await;

    // Wage indexes: quarterly for OPPS, annual for IPPS
    store
        .insert_wage_index(WageIndexRow {
            year: 2025,
            quarter: Some(1),
            cbsa: "41860".to_string(),
            wage_index: 1.25,
            dataset_digest: WAGE_DIGEST.to_string(),
        })
        .await;
    store
        .insert_wage_index(WageIndexRow {
            year: 2025,
            quarter: Some(1),
            cbsa: "35620".to_string(),
            wage_index: 1.10,
            dataset_digest: WAGE_DIGEST.to_string(),
        })
        .await;
    store
        .insert_wage_index(WageIndexRow {
            year: 2025,
            quarter: None,
            cbsa: "41860".to_string(),
            wage_index: 1.20,
            dataset_digest: WAGE_DIGEST.to_string(),
        })
        .await;

    // Inpatient
    store
        .insert_drg_row(DrgRow {
            fiscal_year: 2025,
            drg_code: "470".to_string(),
            relative_weight: 2.0,
            dataset_digest: "ipps-digest-fy2025".to_string(),
        })
        .await;
    store
        .insert_ipps_base_rates(IppsBaseRates {
            fiscal_year: 2025,
            operating_base_cents: 600_000,
            capital_base_cents: 50_000,
            dataset_digest: "ipps-digest-fy2025".to_string(),
        })
        .await;

    // Surgical, laboratory, durable equipment
    store
        .insert_asc_row(AscRow {
            year: 2025,
            quarter: 1,
            hcpcs: "66984".to_string(),
            fee_cents: 150_000,
            dataset_digest: "asc-digest-2025q1".to_string(),
        })
        .await;
    store
        .insert_clfs_row(ClfsRow {
            year: 2025,
            quarter: 1,
            hcpcs: "80053".to_string(),
            fee_cents: 1_000,
            dataset_digest: "clfs-digest-2025q1".to_string(),
        })
        .await;
    store
        .insert_dmepos_row(DmeposRow {
            year: 2025,
            quarter: 1,
            code: "E0601".to_string(),
            rural: false,
            fee_cents: 7_500,
            dataset_digest: "dmepos-digest-2025q1".to_string(),
        })
        .await;
    store
        .insert_dmepos_row(DmeposRow {
            year: 2025,
            quarter: 1,
            code: "E0601".to_string(),
            rural: true,
            fee_cents: 8_200,
            dataset_digest: "dmepos-digest-2025q1".to_string(),
        })
        .await;

    // Drugs
    store
        .insert_drug_asp_row(DrugAspRow {
            year: 2025,
            quarter: 1,
            hcpcs: "J1100".to_string(),
            asp_per_unit_cents: 250,
            dataset_digest: "asp-digest-2025q1".to_string(),
        })
        .await;
    store
        .insert_nadac_row(NadacRow {
            as_of: d(2025, 2, 1),
            ndc11: "00003029311".to_string(),
            unit_price_cents: 30,
            unit_type: "EA".to_string(),
            dataset_digest: "nadac-digest-2025-02".to_string(),
        })
        .await;
    store
        .insert_ndc_crosswalk(NdcCrosswalkRow {
            ndc11: "00003029311".to_string(),
            hcpcs: "J1100".to_string(),
            units_per_hcpcs: 10.0,
            dataset_digest: "xwalk-digest-2025".to_string(),
        })
        .await;
    // An NDC with a NADAC price but no crosswalk
    store
        .insert_nadac_row(NadacRow {
            as_of: d(2025, 2, 1),
            ndc11: "99999000001".to_string(),
            unit_price_cents: 55,
            unit_type: "ML".to_string(),
            dataset_digest: "nadac-digest-2025-02".to_string(),
        })
        .await;

    store
}

/// Resolver over the seeded store with fast defaults.
pub fn resolver(store: Arc<MemoryStore>) -> Arc<GeographyResolver> {
    Arc::new(GeographyResolver::new(store, ResolverConfig::default()))
}

/// Full pricing service over the seeded store with a per-test cache dir.
pub fn pricing_service(store: Arc<MemoryStore>, cache_dir: &std::path::Path) -> PricingService {
    let cache = Arc::new(CacheManager::new(CacheConfig {
        disk_dir: cache_dir.to_path_buf(),
        ..CacheConfig::default()
    }));
    let resolver = resolver(store.clone());
    PricingService::new(store, resolver, cache, Settings::default().request_timeout())
}

/// One plan component with the stored-plan defaults.
pub fn component(sequence: i32, code: &str, setting: Setting) -> AdHocComponent {
    AdHocComponent {
        code: code.to_string(),
        setting,
        sequence: Some(sequence),
        units: None,
        utilization_weight: None,
        professional_component: None,
        facility_component: None,
        modifiers: Vec::new(),
        pos: None,
        ndc11: None,
        wastage_units: None,
    }
}

/// A pricing request for an ad-hoc plan.
pub fn plan_request(zip: &str, components: Vec<AdHocComponent>) -> cms_pricer::pricing::PricingRequest {
    serde_json::from_value(serde_json::json!({
        "zip": zip,
        "year": 2025,
        "quarter": 1,
        "ad_hoc_plan": {"name": "Test Plan", "components": []}
    }))
    .map(|mut request: cms_pricer::pricing::PricingRequest| {
        request.ad_hoc_plan = Some(AdHocPlan {
            name: Some("Test Plan".to_string()),
            components,
        });
        request
    })
    .unwrap()
}
