use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};

use crate::{
    error::AppResult,
    schemas::{ScopedRangeQuery, Stage1Query, Stage2Query, Stage4Query},
    services::{
        activity_compliance::{build_stage2_payload, Stage2Input, Stage2Payload},
        enquiry_effectiveness::{build_stage4_payload, Stage4Input, Stage4Payload},
        insights::{build_insights_payload, InsightsInput, InsightsPayload},
        non_visits::{build_stage3_payload, Stage3Input, Stage3Payload},
        plan_vs_actual::{build_stage1_payload, Stage1Input, Stage1Payload},
        ranges::{
            resolve_insights_range, resolve_stage1_range, resolve_stage2_range,
            resolve_stage3_range, resolve_stage4_range,
        },
        week::today_ist,
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/reports/plan-vs-actual", get(plan_vs_actual_report))
        .route("/reports/activity-compliance", get(activity_compliance_report))
        .route("/reports/non-visits", get(non_visits_report))
        .route(
            "/reports/enquiry-effectiveness",
            get(enquiry_effectiveness_report),
        )
        .route("/reports/insights", get(insights_report))
}

async fn plan_vs_actual_report(
    State(state): State<AppState>,
    Query(query): Query<Stage1Query>,
) -> AppResult<Json<Stage1Payload>> {
    let range = resolve_stage1_range(&query.range, today_ist())?;
    let users = state.store.users().await;
    let reports = state.store.reports().await;
    Ok(Json(build_stage1_payload(Stage1Input {
        users: &users,
        reports: &reports,
        range: &range,
        filters: &query.filters,
    })))
}

async fn activity_compliance_report(
    State(state): State<AppState>,
    Query(query): Query<Stage2Query>,
) -> AppResult<Json<Stage2Payload>> {
    let range = resolve_stage2_range(&query.range, today_ist())?;
    let users = state.store.users().await;
    let reports = state.store.reports().await;
    Ok(Json(build_stage2_payload(Stage2Input {
        users: &users,
        reports: &reports,
        range: &range,
        filters: &query.filters,
        config: state.config.stage2_config(),
    })))
}

async fn non_visits_report(
    State(state): State<AppState>,
    Query(query): Query<ScopedRangeQuery>,
) -> AppResult<Json<Stage3Payload>> {
    let range = resolve_stage3_range(&query.range, today_ist())?;
    let users = state.store.users().await;
    let reports = state.store.reports().await;
    Ok(Json(build_stage3_payload(Stage3Input {
        users: &users,
        reports: &reports,
        range: &range,
        filters: &query.filters,
    })))
}

async fn enquiry_effectiveness_report(
    State(state): State<AppState>,
    Query(query): Query<Stage4Query>,
) -> AppResult<Json<Stage4Payload>> {
    let range = resolve_stage4_range(&query.range, today_ist())?;
    let thresholds = state
        .config
        .stage4_thresholds
        .with_overrides(&query.thresholds);
    let users = state.store.users().await;
    let reports = state.store.reports().await;
    Ok(Json(build_stage4_payload(Stage4Input {
        users: &users,
        reports: &reports,
        range: &range,
        filters: &query.filters,
        thresholds,
    })))
}

async fn insights_report(
    State(state): State<AppState>,
    Query(query): Query<ScopedRangeQuery>,
) -> AppResult<Json<InsightsPayload>> {
    let range = resolve_insights_range(&query.range, today_ist())?;
    let users = state.store.users().await;
    let reports = state.store.reports().await;
    Ok(Json(build_insights_payload(InsightsInput {
        users: &users,
        reports: &reports,
        range: &range,
        filters: &query.filters,
    })))
}
