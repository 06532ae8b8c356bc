use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use chrono::Utc;

use crate::{
    error::{AppError, AppResult},
    models::WeeklyReport,
    schemas::{SaveActualOutputRowsInput, SavePlanningRowsInput, SalesmanPath, WeekQuery},
    services::{
        directory::UserDirectory,
        week::{resolve_week_from_query, today_ist, WeekDescriptor},
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/weekly-reports/{salesman_id}", get(get_weekly_report))
        .route(
            "/weekly-reports/{salesman_id}/planning",
            put(save_planning_rows),
        )
        .route(
            "/weekly-reports/{salesman_id}/actual-output",
            put(save_actual_output_rows),
        )
}

async fn get_weekly_report(
    State(state): State<AppState>,
    Path(path): Path<SalesmanPath>,
    Query(query): Query<WeekQuery>,
) -> AppResult<Json<WeeklyReport>> {
    assert_known_user(&state, &path.salesman_id).await?;
    let week = resolve_week(&query)?;
    Ok(Json(
        state.store.report_or_empty(&path.salesman_id, &week).await,
    ))
}

async fn save_planning_rows(
    State(state): State<AppState>,
    Path(path): Path<SalesmanPath>,
    Query(query): Query<WeekQuery>,
    Json(payload): Json<SavePlanningRowsInput>,
) -> AppResult<Json<WeeklyReport>> {
    assert_known_user(&state, &path.salesman_id).await?;
    let week = resolve_week(&query)?;
    let report = state
        .store
        .save_planning_rows(
            &path.salesman_id,
            &week,
            &payload.planning_rows,
            state.config.allow_legacy_unchanged,
            Utc::now(),
        )
        .await?;
    Ok(Json(report))
}

async fn save_actual_output_rows(
    State(state): State<AppState>,
    Path(path): Path<SalesmanPath>,
    Query(query): Query<WeekQuery>,
    Json(payload): Json<SaveActualOutputRowsInput>,
) -> AppResult<Json<WeeklyReport>> {
    assert_known_user(&state, &path.salesman_id).await?;
    let week = resolve_week(&query)?;
    let report = state
        .store
        .save_actual_output_rows(
            &path.salesman_id,
            &week,
            &payload.actual_output_rows,
            state.config.allow_legacy_unchanged,
            Utc::now(),
        )
        .await?;
    Ok(Json(report))
}

fn resolve_week(query: &WeekQuery) -> AppResult<WeekDescriptor> {
    resolve_week_from_query(query.week.as_deref(), today_ist()).ok_or_else(|| {
        AppError::BadRequest("Invalid week. Use YYYY-Www or YYYY-MM-DD.".to_string())
    })
}

async fn assert_known_user(state: &AppState, salesman_id: &str) -> AppResult<()> {
    let users = state.store.users().await;
    if UserDirectory::new(&users).get(salesman_id).is_none() {
        return Err(AppError::NotFound(format!(
            "User '{salesman_id}' not found."
        )));
    }
    Ok(())
}
