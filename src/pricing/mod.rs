//! Pricing orchestrator
//!
//! Executes a plan end to end: one resolver call, per-line dispatch to
//! the setting engines with the Part B deductible threaded through in
//! sequence order, aggregation, and atomic run persistence. Line-local
//! failures (missing schedule or reference rows) become warnings unless
//! the request is strict; everything else fails the run. Each run
//! respects a request deadline and still writes its trace on timeout.
//!
//! Comparison prices both sides under identical toggles and attaches a
//! parity report; replay re-executes a stored run without persisting and
//! diffs every numeric field.

mod replay;
mod schemas;

pub use replay::{ReplayDiff, ReplayReport};
pub use schemas::*;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::CacheManager;
use crate::engines::{engine_table, PricingContext, PricingEngine, PricingError, PricingResult};
use crate::resolver::{GeographyResolver, ResolveRequest};
use crate::store::{PlanStore, PricingStore, RunStore, ScheduleStore};
use crate::types::{
    scale_cents, AdHocPlan, BenefitParams, Cents, PlanComponent, Resolution, RunInput, RunOutput,
    RunRecord, RunStatus, RunTraceEntry, Setting, StoredRun, ValuationPeriod,
};

/// Query parameters for pricing one code.
#[derive(Debug, Clone)]
pub struct CodePriceParams {
    pub zip: String,
    pub code: String,
    pub setting: Setting,
    pub year: i32,
    pub quarter: Option<u8>,
    pub ccn: Option<String>,
    pub payer: Option<String>,
    pub plan: Option<String>,
}

/// The pricing orchestrator.
pub struct PricingService {
    store: Arc<dyn PricingStore>,
    resolver: Arc<GeographyResolver>,
    engines: HashMap<Setting, Arc<dyn PricingEngine>>,
    request_timeout: Duration,
}

/// Everything `execute_plan` produces besides the response, needed for
/// run persistence.
struct PlanExecution {
    response: PricingResponse,
    outputs: Vec<RunOutput>,
    traces: Vec<RunTraceEntry>,
    status: RunStatus,
}

impl PricingService {
    pub fn new(
        store: Arc<dyn PricingStore>,
        resolver: Arc<GeographyResolver>,
        cache: Arc<CacheManager>,
        request_timeout: Duration,
    ) -> Self {
        let engines = engine_table(store.clone(), cache);
        Self {
            store,
            resolver,
            engines,
            request_timeout,
        }
    }

    /// Price one code as a single ad-hoc line.
    pub async fn price_single_code(
        &self,
        params: CodePriceParams,
    ) -> PricingResult<CodePriceResponse> {
        let request = PricingRequest {
            zip: params.zip,
            plan_id: None,
            ad_hoc_plan: Some(AdHocPlan {
                name: Some(format!("{} {}", params.setting, params.code)),
                components: vec![crate::types::AdHocComponent {
                    code: params.code,
                    setting: params.setting,
                    sequence: Some(1),
                    units: None,
                    utilization_weight: None,
                    professional_component: None,
                    facility_component: None,
                    modifiers: Vec::new(),
                    pos: None,
                    ndc11: None,
                    wastage_units: None,
                }],
            }),
            year: params.year,
            quarter: params.quarter,
            valuation_date: None,
            ccn: params.ccn,
            payer: params.payer,
            plan: params.plan,
            include_home_health: false,
            include_snf: false,
            apply_sequestration: false,
            sequestration_rate: 0.02,
            format: Default::default(),
            strict: false,
        };

        let response = self
            .price_plan_recorded("/pricing/codes/price", request)
            .await?;
        let line = response
            .line_items
            .into_iter()
            .next()
            .ok_or_else(|| PricingError::Internal("single-code run produced no line".into()))?;
        Ok(CodePriceResponse {
            run_id: response.run_id,
            geography: response.geography,
            line,
            datasets_used: response.datasets_used,
            warnings: response.warnings,
        })
    }

    /// Price a plan, recording the run.
    pub async fn price_plan(&self, request: PricingRequest) -> PricingResult<PricingResponse> {
        self.price_plan_recorded("/pricing/price", request).await
    }

    /// Compare a plan across two locations, recording the comparison run.
    pub async fn compare(&self, request: ComparisonRequest) -> PricingResult<ComparisonResponse> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        let request_value = serde_json::to_value(&request).map_err(crate::store::StoreError::from)?;

        let outcome = self.compare_inner(run_id, &request, true).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(response) => {
                let response_value =
                    serde_json::to_value(&response).map_err(crate::store::StoreError::from)?;
                let parity_trace = RunTraceEntry {
                    kind: "comparison_parity".to_string(),
                    payload: serde_json::to_value(&response.parity)
                        .unwrap_or(serde_json::Value::Null),
                    line_sequence: None,
                };
                self.persist_run(
                    run_id,
                    "/pricing/compare",
                    request_value,
                    Some(response_value),
                    RunStatus::Success,
                    started_at,
                    duration_ms,
                    Vec::new(),
                    vec![parity_trace],
                )
                .await;
                Ok(response)
            }
            Err(err) => {
                self.persist_error_run(
                    run_id,
                    "/pricing/compare",
                    request_value,
                    started_at,
                    duration_ms,
                    &err,
                )
                .await;
                Err(err)
            }
        }
    }

    /// Re-execute a stored run and diff the results. Nothing is
    /// persisted, so cancellation mid-replay leaves no partial state.
    pub async fn replay(&self, run_id: Uuid) -> PricingResult<ReplayReport> {
        let stored = self
            .store
            .run(run_id)
            .await?
            .ok_or(PricingError::RunNotFound(run_id))?;

        let Some(original_response) = stored.run.response.clone() else {
            return Err(PricingError::InvalidInput(format!(
                "run {} has no stored response to replay against",
                run_id
            )));
        };

        info!(run_id = %run_id, endpoint = %stored.run.endpoint, "replaying run");

        let replayed_value = match stored.run.endpoint.as_str() {
            "/pricing/compare" => {
                let request: ComparisonRequest =
                    serde_json::from_value(stored.run.request.clone())
                        .map_err(crate::store::StoreError::from)?;
                let response = self.compare_inner(run_id, &request, false).await?;
                serde_json::to_value(response).map_err(crate::store::StoreError::from)?
            }
            _ => {
                let request: PricingRequest = serde_json::from_value(stored.run.request.clone())
                    .map_err(crate::store::StoreError::from)?;
                request.validate()?;
                let execution = self.execute_plan(run_id, &request).await?;
                serde_json::to_value(execution.response)
                    .map_err(crate::store::StoreError::from)?
            }
        };

        Ok(replay::build_report(
            run_id,
            &stored.run.endpoint,
            &original_response,
            &replayed_value,
            stored.dataset_digests(),
        ))
    }

    async fn compare_inner(
        &self,
        run_id: Uuid,
        request: &ComparisonRequest,
        persist_sides: bool,
    ) -> PricingResult<ComparisonResponse> {
        let request_a = request.side(&request.zip_a, request.ccn_a.as_ref());
        let request_b = request.side(&request.zip_b, request.ccn_b.as_ref());

        let (result_a, result_b) = if persist_sides {
            (
                self.price_plan_recorded("/pricing/price", request_a).await?,
                self.price_plan_recorded("/pricing/price", request_b).await?,
            )
        } else {
            (
                self.execute_plan(Uuid::new_v4(), &request_a).await?.response,
                self.execute_plan(Uuid::new_v4(), &request_b).await?.response,
            )
        };

        let parity = validate_parity(&result_a, &result_b);
        if !parity.valid {
            warn!(
                run_id = %run_id,
                violations = ?parity.violations,
                "comparison parity violated"
            );
        }

        let deltas = vec![
            delta("total_allowed", result_a.totals.allowed_cents, result_b.totals.allowed_cents),
            delta(
                "total_beneficiary",
                result_a.totals.beneficiary_total_cents,
                result_b.totals.beneficiary_total_cents,
            ),
            delta(
                "total_program_payment",
                result_a.totals.program_payment_cents,
                result_b.totals.program_payment_cents,
            ),
        ];

        let total_delta_cents = result_b.totals.allowed_cents - result_a.totals.allowed_cents;
        let total_delta_percent =
            percentage_delta(result_a.totals.allowed_cents, result_b.totals.allowed_cents);

        Ok(ComparisonResponse {
            run_id,
            plan_id: request.plan_id,
            plan_name: result_a.plan_name.clone(),
            location_a: result_a,
            location_b: result_b,
            deltas,
            parity,
            total_delta_cents,
            total_delta_percent,
        })
    }

    /// Execute and persist one plan-pricing run under a deadline.
    async fn price_plan_recorded(
        &self,
        endpoint: &str,
        request: PricingRequest,
    ) -> PricingResult<PricingResponse> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        let request_value = serde_json::to_value(&request).map_err(crate::store::StoreError::from)?;

        let outcome = tokio::time::timeout(self.request_timeout, self.execute_plan(run_id, &request))
            .await
            .unwrap_or(Err(PricingError::Timeout));
        let duration_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(execution) => {
                let response_value = serde_json::to_value(&execution.response)
                    .map_err(crate::store::StoreError::from)?;
                self.persist_run(
                    run_id,
                    endpoint,
                    request_value,
                    Some(response_value),
                    execution.status,
                    started_at,
                    duration_ms,
                    execution.outputs,
                    execution.traces,
                )
                .await;
                Ok(execution.response)
            }
            Err(err) => {
                error!(run_id = %run_id, error = %err, "plan pricing failed");
                self.persist_error_run(
                    run_id,
                    endpoint,
                    request_value,
                    started_at,
                    duration_ms,
                    &err,
                )
                .await;
                Err(err)
            }
        }
    }

    /// The run body: resolve once, price each component in sequence
    /// order, aggregate.
    async fn execute_plan(
        &self,
        run_id: Uuid,
        request: &PricingRequest,
    ) -> PricingResult<PlanExecution> {
        request.validate()?;

        let resolution = self
            .resolver
            .resolve(&ResolveRequest {
                zip: request.zip.clone(),
                plus4: None,
                valuation_year: Some(request.year),
                quarter: request.quarter,
                valuation_date: request.valuation_date,
                strict: request.strict,
                expose_carrier: false,
                initial_radius_miles: None,
                expand_step_miles: None,
                max_radius_miles: None,
            })
            .await?;

        let period =
            ValuationPeriod::derive(Some(request.year), request.quarter, request.valuation_date)
                .map_err(PricingError::InvalidInput)?;

        let (plan_name, components) = self.load_components(request).await?;

        let benefits = self
            .store
            .benefit_params(request.year)
            .await?
            .unwrap_or_else(|| BenefitParams::defaults_for(request.year));

        let mut deductible_remaining = benefits.part_b_deductible_cents;
        let mut line_items = Vec::with_capacity(components.len());
        let mut outputs = Vec::with_capacity(components.len());
        let mut traces = vec![RunTraceEntry {
            kind: "geo_resolution".to_string(),
            payload: resolution_trace_payload(&request.zip, &resolution),
            line_sequence: None,
        }];
        let mut totals = Totals::default();
        let mut warnings = Vec::new();
        let mut datasets_used = vec![resolution.dataset_digest.clone()];

        if components.is_empty() {
            warnings.push("plan has no components".to_string());
        }

        for component in &components {
            let engine = self.engines.get(&component.setting).ok_or_else(|| {
                PricingError::Internal(format!("no engine for setting {}", component.setting))
            })?;

            let ctx = PricingContext {
                resolution: resolution.clone(),
                period: period.clone(),
                benefits: benefits.clone(),
                deductible_remaining_cents: deductible_remaining,
            };

            match engine.price(&ctx, component).await {
                Ok(result) => {
                    deductible_remaining = result.deductible_remaining_cents;
                    totals.accumulate(&result);
                    datasets_used.extend(result.dataset_digests.iter().cloned());
                    for note in &result.notes {
                        warnings.push(format!("line {}: {}", component.sequence, note));
                    }
                    traces.push(RunTraceEntry {
                        kind: "line_pricing".to_string(),
                        payload: serde_json::json!({
                            "code": component.code,
                            "setting": component.setting.as_str(),
                            "trace_refs": result.trace_refs,
                            "dataset_digests": result.dataset_digests,
                            "modifiers_applied": result.modifiers_applied,
                            "notes": result.notes,
                        }),
                        line_sequence: Some(component.sequence),
                    });
                    let item = LineItem::priced(component, &result);
                    outputs.push(run_output_from(&item));
                    line_items.push(item);
                }
                Err(err) if err.is_line_local() && !request.strict => {
                    warn!(
                        run_id = %run_id,
                        code = %component.code,
                        setting = %component.setting,
                        error = %err,
                        "line pricing failed, continuing"
                    );
                    warnings.push(format!(
                        "line {} ({} {}): {}",
                        component.sequence, component.setting, component.code, err
                    ));
                    traces.push(RunTraceEntry {
                        kind: "line_failure".to_string(),
                        payload: serde_json::json!({
                            "code": component.code,
                            "setting": component.setting.as_str(),
                            "error_code": err.code(),
                            "error": err.to_string(),
                        }),
                        line_sequence: Some(component.sequence),
                    });
                    let item = LineItem::failed(component, &err);
                    outputs.push(run_output_from(&item));
                    line_items.push(item);
                }
                Err(err) => return Err(err),
            }
        }

        datasets_used.sort();
        datasets_used.dedup();

        let sequestration_reduction_cents: Cents = if request.apply_sequestration {
            scale_cents(totals.program_payment_cents, request.sequestration_rate)
        } else {
            0
        };

        let failed_lines = line_items
            .iter()
            .filter(|l| l.status == LineStatus::Failed)
            .count();
        let status = if failed_lines == 0 {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };

        let response = PricingResponse {
            run_id,
            plan_id: request.plan_id,
            plan_name,
            geography: GeographySummary::from_resolution(&request.zip, &resolution),
            line_items,
            totals,
            remaining_deductible_cents: deductible_remaining,
            sequestration_applied: request.apply_sequestration,
            sequestration_reduction_cents,
            datasets_used,
            warnings,
        };

        Ok(PlanExecution {
            response,
            outputs,
            traces,
            status,
        })
    }

    /// Load components from the stored plan or normalize the ad-hoc
    /// payload, ordered by sequence (input order breaks ties).
    async fn load_components(
        &self,
        request: &PricingRequest,
    ) -> PricingResult<(String, Vec<PlanComponent>)> {
        if let Some(plan_id) = request.plan_id {
            let plan = self
                .store
                .plan(plan_id)
                .await?
                .ok_or(PricingError::PlanNotFound(plan_id))?;
            if plan.components.is_empty() {
                warn!(plan_id = %plan_id, "stored plan has no components");
            }
            let mut components = plan.components;
            components.sort_by_key(|c| c.sequence);
            return Ok((plan.name, components));
        }

        let ad_hoc = request.ad_hoc_plan.clone().unwrap_or_default();
        let mut components: Vec<PlanComponent> = ad_hoc
            .components
            .iter()
            .enumerate()
            .map(|(idx, raw)| raw.normalize(idx as i32 + 1))
            .collect();
        components.sort_by_key(|c| c.sequence);
        Ok((
            ad_hoc.name.unwrap_or_else(|| "Ad-hoc Plan".to_string()),
            components,
        ))
    }

    /// Persist a completed run. Failures are logged, never surfaced.
    #[allow(clippy::too_many_arguments)]
    async fn persist_run(
        &self,
        run_id: Uuid,
        endpoint: &str,
        request: serde_json::Value,
        response: Option<serde_json::Value>,
        status: RunStatus,
        started_at: chrono::DateTime<Utc>,
        duration_ms: i64,
        outputs: Vec<RunOutput>,
        mut traces: Vec<RunTraceEntry>,
    ) {
        let inputs = run_inputs_from(&request);
        traces.push(RunTraceEntry {
            kind: "run_summary".to_string(),
            payload: serde_json::json!({
                "endpoint": endpoint,
                "status": status.as_str(),
                "duration_ms": duration_ms,
                "line_count": outputs.len(),
            }),
            line_sequence: None,
        });

        let stored = StoredRun {
            run: RunRecord {
                run_id,
                endpoint: endpoint.to_string(),
                request,
                response,
                status,
                started_at,
                duration_ms,
            },
            inputs,
            outputs,
            traces,
        };

        if let Err(err) = self.store.store_run(&stored).await {
            error!(run_id = %run_id, error = %err, "failed to store run");
        } else {
            info!(run_id = %run_id, endpoint = endpoint, status = status.as_str(), "run stored");
        }
    }

    async fn persist_error_run(
        &self,
        run_id: Uuid,
        endpoint: &str,
        request: serde_json::Value,
        started_at: chrono::DateTime<Utc>,
        duration_ms: i64,
        err: &PricingError,
    ) {
        let traces = vec![RunTraceEntry {
            kind: "run_error".to_string(),
            payload: serde_json::json!({
                "error_code": err.code(),
                "error": err.to_string(),
            }),
            line_sequence: None,
        }];
        self.persist_run(
            run_id,
            endpoint,
            request,
            None,
            RunStatus::Error,
            started_at,
            duration_ms,
            Vec::new(),
            traces,
        )
        .await;
    }
}

fn delta(field: &str, a: Cents, b: Cents) -> ComparisonDelta {
    ComparisonDelta {
        field: field.to_string(),
        location_a: a,
        location_b: b,
        delta_cents: b - a,
        delta_percent: percentage_delta(a, b),
    }
}

/// Parity invariants for comparison runs: dataset digests, toggles, and
/// plan identity must match across sides.
fn validate_parity(a: &PricingResponse, b: &PricingResponse) -> ParityReport {
    let snapshots_match = a.datasets_used == b.datasets_used;
    let toggles_match = a.sequestration_applied == b.sequestration_applied;
    let plan_match = a.plan_id == b.plan_id;

    let mut violations = Vec::new();
    if !snapshots_match {
        violations.push(ParityViolation::DatasetDigestDiffer);
    }
    if !toggles_match {
        violations.push(ParityViolation::TogglesDiffer);
    }
    if !plan_match {
        violations.push(ParityViolation::PlanDiffer);
    }

    ParityReport {
        valid: violations.is_empty(),
        violations,
        snapshots_match,
        toggles_match,
        plan_match,
    }
}

fn resolution_trace_payload(zip: &str, resolution: &Resolution) -> serde_json::Value {
    serde_json::json!({
        "zip": zip,
        "match_level": resolution.match_level.as_str(),
        "locality_id": resolution.locality_id,
        "state": resolution.state,
        "dataset_digest": resolution.dataset_digest,
        "nearest_zip": resolution.nearest_zip,
        "distance_miles": resolution.distance_miles,
        "pobox_fallback": resolution.pobox_fallback,
    })
}

fn run_output_from(item: &LineItem) -> RunOutput {
    RunOutput {
        line_sequence: item.sequence,
        code: item.code.clone(),
        setting: item.setting.as_str().to_string(),
        allowed_cents: item.allowed_cents,
        beneficiary_deductible_cents: item.beneficiary_deductible_cents,
        beneficiary_coinsurance_cents: item.beneficiary_coinsurance_cents,
        beneficiary_total_cents: item.beneficiary_total_cents,
        program_payment_cents: item.program_payment_cents,
        source: item.source.as_str().to_string(),
        trace_refs: item.trace_refs.clone(),
        dataset_digests: item.dataset_digests.clone(),
    }
}

/// Flatten the top-level request parameters into queryable rows.
fn run_inputs_from(request: &serde_json::Value) -> Vec<RunInput> {
    let Some(object) = request.as_object() else {
        return Vec::new();
    };
    object
        .iter()
        .map(|(name, value)| {
            let parameter_type = match value {
                serde_json::Value::Null => "null",
                serde_json::Value::Bool(_) => "boolean",
                serde_json::Value::Number(_) => "number",
                serde_json::Value::String(_) => "string",
                serde_json::Value::Array(_) => "array",
                serde_json::Value::Object(_) => "object",
            };
            let parameter_value = match value {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            };
            RunInput {
                parameter_name: name.clone(),
                parameter_value,
                parameter_type: parameter_type.to_string(),
            }
        })
        .collect()
}
