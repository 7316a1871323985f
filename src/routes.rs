//! HTTP routes for booking, fulfilling and auditing ledger records.

use std::sync::MutexGuard;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::analysis::{
    analyze_or_fallback, summarize_chain, ChainSummaryItem, FALLBACK_ANALYSIS,
};
use crate::app::AppState;
use crate::error::LedgerError;
use crate::ledger::{append, audit, verify};
use crate::model::{Payload, Priority, Record, EXAM_TYPES, HOSPITAL_ISSUER, PATIENT_ISSUER};
use crate::reconcile::{find_pending, pending, stats, ChainStats};
use crate::storage::{reset_chain, save_chain};

type ApiError = (StatusCode, String);

fn internal(msg: impl Into<String>) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, msg.into())
}

fn lock(state: &AppState) -> Result<MutexGuard<'_, Vec<Record>>, ApiError> {
    state.ledger.lock().map_err(|_| internal("ledger lock poisoned"))
}

/// Append a payload after the current head, persist, then re-verify.
///
/// The caller holds the ledger lock for the whole sequence, so appends never
/// race on the same prior record.
fn commit(
    state: &AppState,
    chain: &mut Vec<Record>,
    payload: Payload,
    issuer: &str,
) -> Result<Record, ApiError> {
    let prior = chain.last().ok_or_else(|| internal("ledger is empty"))?;
    let record = append(prior, payload, issuer).map_err(|e| match e {
        LedgerError::MalformedPrior { .. } => (StatusCode::CONFLICT, e.to_string()),
        other => internal(other.to_string()),
    })?;

    chain.push(record.clone());
    if let Err(e) = save_chain(state.store.as_ref(), chain) {
        chain.pop();
        tracing::error!(error = %e, "failed to persist chain");
        return Err(internal("persist failed"));
    }

    if !verify(chain) {
        tracing::warn!(
            seq = record.sequence_number,
            "chain integrity compromised after append"
        );
    }
    tracing::info!(
        seq = record.sequence_number,
        nre = %record.payload.nre,
        action = record.payload.action.as_str(),
        issuer,
        "record committed"
    );
    Ok(record)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingInput {
    pub nre: String,
    pub fiscal_code: String,
    pub priority: Priority,
    pub exam_type: String,
}

/// POST /bookings
pub async fn add_booking(
    State(state): State<AppState>,
    Json(input): Json<BookingInput>,
) -> Result<Json<Record>, ApiError> {
    let payload = Payload::booking(
        &input.nre,
        &input.fiscal_code,
        input.priority,
        &input.exam_type,
    )
    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let mut guard = lock(&state)?;
    let record = commit(&state, &mut guard, payload, PATIENT_ISSUER)?;
    Ok(Json(record))
}

/// POST /bookings/:seq/fulfill
pub async fn fulfill_booking(
    State(state): State<AppState>,
    Path(seq): Path<u64>,
) -> Result<Json<Record>, ApiError> {
    let mut guard = lock(&state)?;
    let creation = find_pending(&guard, seq)
        .map(|r| r.payload.clone())
        .ok_or((StatusCode::CONFLICT, format!("record {seq} is not a pending booking")))?;

    let report_no = rand::thread_rng().gen_range(0..10_000);
    let payload = Payload::fulfillment_of(
        &creation,
        format!("Service delivered successfully. Report #REF-{report_no}"),
    );
    let record = commit(&state, &mut guard, payload, HOSPITAL_ISSUER)?;
    Ok(Json(record))
}

/// GET /records
pub async fn list_records(State(state): State<AppState>) -> Result<Json<Vec<Record>>, ApiError> {
    let guard = lock(&state)?;
    Ok(Json(guard.clone()))
}

/// GET /records/:seq
pub async fn get_record(
    State(state): State<AppState>,
    Path(seq): Path<u64>,
) -> Result<Json<Record>, ApiError> {
    let guard = lock(&state)?;
    let record = usize::try_from(seq)
        .ok()
        .and_then(|i| guard.get(i))
        .ok_or((StatusCode::NOT_FOUND, "not found".to_string()))?;
    Ok(Json(record.clone()))
}

/// GET /pending
pub async fn list_pending(State(state): State<AppState>) -> Result<Json<Vec<Record>>, ApiError> {
    let guard = lock(&state)?;
    Ok(Json(pending(&guard).into_iter().cloned().collect()))
}

#[derive(Serialize)]
pub struct StatsResp {
    #[serde(flatten)]
    pub stats: ChainStats,
    pub valid: bool,
}

/// GET /stats
pub async fn chain_stats(State(state): State<AppState>) -> Result<Json<StatsResp>, ApiError> {
    let guard = lock(&state)?;
    Ok(Json(StatsResp {
        stats: stats(&guard),
        valid: verify(&guard),
    }))
}

/// GET /validate: recompute every digest and link; returns { ok, errors[], warnings[] }
#[derive(Serialize)]
pub struct ValidateResp {
    pub ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub async fn validate_chain(
    State(state): State<AppState>,
) -> Result<Json<ValidateResp>, ApiError> {
    let guard = lock(&state)?;
    let report = audit(&guard);
    Ok(Json(ValidateResp {
        ok: report.valid,
        errors: report.violations.iter().map(ToString::to_string).collect(),
        warnings: report.warnings.iter().map(ToString::to_string).collect(),
    }))
}

#[derive(Serialize)]
pub struct AnalysisResp {
    pub analysis: String,
    pub summary: Vec<ChainSummaryItem>,
}

/// POST /analyze (advisory); always answers 200, with a fixed message on failure.
pub async fn analyze(State(state): State<AppState>) -> Json<AnalysisResp> {
    let snapshot = match state.ledger.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => {
            tracing::warn!("ledger lock poisoned; skipping analysis");
            return Json(AnalysisResp {
                analysis: FALLBACK_ANALYSIS.to_string(),
                summary: Vec::new(),
            });
        }
    };
    let analysis =
        analyze_or_fallback(state.analyzer.as_ref(), &snapshot, state.analysis_timeout).await;
    Json(AnalysisResp {
        analysis,
        summary: summarize_chain(&snapshot),
    })
}

/// POST /reset replaces the whole chain with a fresh genesis record.
pub async fn reset(State(state): State<AppState>) -> Result<Json<Vec<Record>>, ApiError> {
    let mut guard = lock(&state)?;
    let fresh = reset_chain(state.store.as_ref()).map_err(|e| {
        tracing::error!(error = %e, "failed to reset chain");
        internal("reset failed")
    })?;
    *guard = fresh.clone();
    Ok(Json(fresh))
}

/// GET /exam-types
pub async fn exam_types() -> Json<Vec<&'static str>> {
    Json(EXAM_TYPES.to_vec())
}

/// GET /health
#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
}
pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

/// GET /version
#[derive(Serialize)]
pub struct Version {
    pub version: &'static str,
    pub git_sha: Option<&'static str>,
}
pub async fn version() -> Json<Version> {
    Json(Version {
        version: env!("CARGO_PKG_VERSION"),
        git_sha: option_env!("GIT_SHA"),
    })
}
