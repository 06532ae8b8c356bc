use axum::{
    extract::{Path, Query, State},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    models::{ExceptionCase, ExceptionStatus},
    schemas::{validate_input, CasePath, Stage5Query, StatusTransitionInput, SyncExceptionsInput},
    services::{
        directory::UserDirectory,
        exceptions::{
            build_stage5_candidates, build_stage5_payload, Stage5CandidateInput, Stage5Input,
            Stage5Payload,
        },
        metrics::non_empty_opt,
        ranges::resolve_stage5_range,
        week::today_ist,
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/exceptions", get(list_exceptions))
        .route("/exceptions/sync", post(sync_exceptions))
        .route("/exceptions/{case_key}/status", patch(transition_exception))
}

async fn list_exceptions(
    State(state): State<AppState>,
    Query(query): Query<Stage5Query>,
) -> AppResult<Json<Stage5Payload>> {
    let range = resolve_stage5_range(&query.range, today_ist())?;
    let filters = query.filters.normalized();
    filters.validate()?;
    let users = state.store.users().await;
    let cases = state.store.cases().await;
    Ok(Json(build_stage5_payload(Stage5Input {
        users: &users,
        cases: &cases,
        range: &range,
        filters: &filters,
    })))
}

/// Detects candidates over the range and upserts them into the case store.
async fn sync_exceptions(
    State(state): State<AppState>,
    Json(payload): Json<SyncExceptionsInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let range = resolve_stage5_range(&payload.range_query(), today_ist())?;
    let users = state.store.users().await;
    let reports = state.store.reports().await;
    let detected = build_stage5_candidates(Stage5CandidateInput {
        users: &users,
        reports: &reports,
        range: &range,
    });
    let candidates = detected.candidates.len();
    let outcome = state
        .store
        .upsert_candidates(detected.candidates, Utc::now())
        .await?;
    Ok(Json(json!({
        "range": range,
        "candidates": candidates,
        "inserted": outcome.inserted,
        "updated": outcome.updated,
    })))
}

async fn transition_exception(
    State(state): State<AppState>,
    Path(path): Path<CasePath>,
    Json(payload): Json<StatusTransitionInput>,
) -> AppResult<Json<ExceptionCase>> {
    validate_input(&payload)?;
    let next = ExceptionStatus::parse(&payload.status).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Invalid status '{}'. Use open, in_review, resolved or ignored.",
            payload.status.trim()
        ))
    })?;
    let changed_by = payload.changed_by.trim();
    let users = state.store.users().await;
    if !UserDirectory::new(&users).is_admin(changed_by) {
        return Err(AppError::Forbidden(
            "Only admins can change exception status.".to_string(),
        ));
    }
    let note = non_empty_opt(payload.note.as_deref());
    let case = state
        .store
        .transition_case(&path.case_key, next, changed_by, note.as_deref(), Utc::now())
        .await?;
    Ok(Json(case))
}
